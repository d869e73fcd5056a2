diesel::table! {
    organizations (id) {
        id -> Uuid,
        name -> Varchar,
        slug -> Varchar,
        stripe_customer_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        full_name -> Varchar,
        password_hash -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    org_members (org_id, user_id) {
        org_id -> Uuid,
        user_id -> Uuid,
        role -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    org_invitations (id) {
        id -> Uuid,
        org_id -> Uuid,
        email -> Varchar,
        role -> Varchar,
        token -> Varchar,
        invited_by -> Uuid,
        expires_at -> Timestamptz,
        accepted_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    teams (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
        leader_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    team_members (team_id, user_id) {
        team_id -> Uuid,
        user_id -> Uuid,
        org_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    leads (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
        email -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        stage -> Varchar,
        rating -> Int2,
        assigned_to -> Nullable<Uuid>,
        created_by -> Uuid,
        product_id -> Nullable<Uuid>,
        negotiated_value -> Nullable<Numeric>,
        payment_method_id -> Nullable<Uuid>,
        installments -> Nullable<Int4>,
        notes -> Nullable<Text>,
        source -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        closed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    lead_stage_history (id) {
        id -> Uuid,
        org_id -> Uuid,
        lead_id -> Uuid,
        previous_stage -> Nullable<Varchar>,
        stage -> Varchar,
        reason -> Nullable<Text>,
        changed_by -> Uuid,
        created_at -> Timestamptz,
        seq -> Int8,
    }
}

diesel::table! {
    funnel_stages_custom (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
        color -> Varchar,
        position -> Int4,
        stage_type -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    lead_followups (id) {
        id -> Uuid,
        org_id -> Uuid,
        lead_id -> Uuid,
        scheduled_for -> Timestamptz,
        note -> Nullable<Text>,
        completed_at -> Nullable<Timestamptz>,
        created_by -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        price -> Numeric,
        currency -> Varchar,
        image_url -> Nullable<Varchar>,
        is_active -> Bool,
        faqs -> Jsonb,
        ingredients -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    payment_methods (id) {
        id -> Uuid,
        org_id -> Uuid,
        name -> Varchar,
        kind -> Varchar,
        fee_percent -> Numeric,
        max_installments -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    receivables (id) {
        id -> Uuid,
        org_id -> Uuid,
        lead_id -> Nullable<Uuid>,
        description -> Varchar,
        amount -> Numeric,
        payment_method_id -> Nullable<Uuid>,
        due_date -> Date,
        paid_at -> Nullable<Timestamptz>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    receptive_attendances (id) {
        id -> Uuid,
        org_id -> Uuid,
        attendant_id -> Uuid,
        customer_name -> Varchar,
        phone -> Nullable<Varchar>,
        channel -> Varchar,
        product_id -> Nullable<Uuid>,
        reason -> Nullable<Text>,
        outcome -> Varchar,
        lead_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Uuid,
        org_id -> Uuid,
        stripe_subscription_id -> Nullable<Varchar>,
        stripe_customer_id -> Varchar,
        status -> Varchar,
        current_period_end -> Nullable<Timestamptz>,
        cancel_at_period_end -> Bool,
        last_payment_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    whatsapp_connections (id) {
        id -> Uuid,
        org_id -> Uuid,
        provider -> Varchar,
        external_id -> Varchar,
        access_token -> Text,
        base_url -> Nullable<Varchar>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    whatsapp_messages (id) {
        id -> Uuid,
        org_id -> Uuid,
        lead_id -> Nullable<Uuid>,
        direction -> Varchar,
        provider -> Varchar,
        external_id -> Nullable<Varchar>,
        phone -> Varchar,
        body -> Nullable<Text>,
        media_type -> Nullable<Varchar>,
        sent_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(org_members -> organizations (org_id));
diesel::joinable!(org_members -> users (user_id));
diesel::joinable!(team_members -> teams (team_id));
diesel::joinable!(leads -> organizations (org_id));
diesel::joinable!(lead_followups -> leads (lead_id));
diesel::joinable!(receivables -> payment_methods (payment_method_id));

diesel::allow_tables_to_appear_in_same_query!(
    organizations,
    users,
    org_members,
    org_invitations,
    teams,
    team_members,
    leads,
    lead_stage_history,
    funnel_stages_custom,
    lead_followups,
    products,
    payment_methods,
    receivables,
    receptive_attendances,
    subscriptions,
    whatsapp_connections,
    whatsapp_messages,
);
