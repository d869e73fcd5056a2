//! Ordered lists embedded in a product (FAQ entries, ingredients).
//!
//! After every mutation each item's `position` equals its index.

use thiserror::Error;

use crate::shared::error::CrmError;

pub trait Positioned {
    fn position(&self) -> i32;
    fn set_position(&mut self, position: i32);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListOpError {
    #[error("index {index} is out of range for a list of {len} items")]
    OutOfRange { index: usize, len: usize },
}

impl From<ListOpError> for CrmError {
    fn from(e: ListOpError) -> Self {
        CrmError::Validation(e.to_string())
    }
}

pub fn reindex<T: Positioned>(items: &mut [T]) {
    for (i, item) in items.iter_mut().enumerate() {
        item.set_position(i as i32);
    }
}

/// Inserts at `index`, or appends when `index` is `None`. Inserting at
/// `len` is the same as appending.
pub fn insert_at<T: Positioned>(items: &mut Vec<T>, index: Option<usize>, item: T) -> Result<(), ListOpError> {
    let len = items.len();
    let index = index.unwrap_or(len);
    if index > len {
        return Err(ListOpError::OutOfRange { index, len });
    }
    items.insert(index, item);
    reindex(items);
    Ok(())
}

pub fn remove_at<T: Positioned>(items: &mut Vec<T>, index: usize) -> Result<T, ListOpError> {
    if index >= items.len() {
        return Err(ListOpError::OutOfRange {
            index,
            len: items.len(),
        });
    }
    let removed = items.remove(index);
    reindex(items);
    Ok(removed)
}

pub fn move_item<T: Positioned>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), ListOpError> {
    let len = items.len();
    for index in [from, to] {
        if index >= len {
            return Err(ListOpError::OutOfRange { index, len });
        }
    }
    let item = items.remove(from);
    items.insert(to, item);
    reindex(items);
    Ok(())
}

/// Lists read back from storage may carry stale positions; order by the
/// stored position and renumber.
pub fn normalize<T: Positioned>(items: &mut [T]) {
    items.sort_by_key(|i| i.position());
    reindex(items);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        label: &'static str,
        position: i32,
    }

    impl Positioned for Item {
        fn position(&self) -> i32 {
            self.position
        }
        fn set_position(&mut self, position: i32) {
            self.position = position;
        }
    }

    fn items(labels: &[&'static str]) -> Vec<Item> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| Item {
                label,
                position: i as i32,
            })
            .collect()
    }

    fn labels(items: &[Item]) -> Vec<&'static str> {
        items.iter().map(|i| i.label).collect()
    }

    fn assert_dense(items: &[Item]) {
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.position, i as i32);
        }
    }

    #[test]
    fn test_insert_in_middle_and_append() {
        let mut list = items(&["a", "b", "c"]);
        insert_at(&mut list, Some(1), Item { label: "x", position: 99 }).expect("insert");
        insert_at(&mut list, None, Item { label: "z", position: -1 }).expect("append");
        assert_eq!(labels(&list), vec!["a", "x", "b", "c", "z"]);
        assert_dense(&list);
    }

    #[test]
    fn test_insert_past_end_fails() {
        let mut list = items(&["a"]);
        let err = insert_at(&mut list, Some(3), Item { label: "x", position: 0 }).unwrap_err();
        assert_eq!(err, ListOpError::OutOfRange { index: 3, len: 1 });
        assert_eq!(labels(&list), vec!["a"]);
    }

    #[test]
    fn test_remove_reindexes() {
        let mut list = items(&["a", "b", "c", "d"]);
        let removed = remove_at(&mut list, 1).expect("remove");
        assert_eq!(removed.label, "b");
        assert_eq!(labels(&list), vec!["a", "c", "d"]);
        assert_dense(&list);
        assert!(remove_at(&mut list, 3).is_err());
    }

    #[test]
    fn test_move_forward_and_back() {
        let mut list = items(&["a", "b", "c", "d"]);
        move_item(&mut list, 0, 2).expect("move");
        assert_eq!(labels(&list), vec!["b", "c", "a", "d"]);
        move_item(&mut list, 3, 0).expect("move");
        assert_eq!(labels(&list), vec!["d", "b", "c", "a"]);
        assert_dense(&list);
        assert!(move_item(&mut list, 0, 4).is_err());
    }

    #[test]
    fn test_normalize_sorts_by_stored_position() {
        let mut list = vec![
            Item { label: "c", position: 7 },
            Item { label: "a", position: 1 },
            Item { label: "b", position: 3 },
        ];
        normalize(&mut list);
        assert_eq!(labels(&list), vec!["a", "b", "c"]);
        assert_dense(&list);
    }
}
