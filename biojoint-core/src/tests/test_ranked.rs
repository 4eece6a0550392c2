use crate::ranked::RankedList;

#[test]
fn test_keeps_top_k_descending() {
    crate::init();
    let mut list = RankedList::new(3);
    for (s, name) in [(0.1, "a"), (0.9, "b"), (0.5, "c"), (0.7, "d"), (0.2, "e")] {
        list.add(s, name);
    }
    let got: Vec<_> = list.iter().map(|(t, _)| *t).collect();
    assert_eq!(got, vec!["b", "d", "c"]);
    assert_eq!(list.best_score(), Some(0.9));
    assert_eq!(list.worst_score(), Some(0.5));
}

#[test]
fn test_ties_keep_insertion_order() {
    let mut list = RankedList::new(4);
    list.add(1.0, "first");
    list.add(2.0, "top");
    list.add(1.0, "second");
    list.add(1.0, "third");
    let got: Vec<_> = list.iter().map(|(t, _)| *t).collect();
    assert_eq!(got, vec!["top", "first", "second", "third"]);

    // full list: an equal score does not displace the worst
    assert!(!list.add(1.0, "fourth"));
    assert!(list.add(1.5, "better"));
    assert_eq!(list.get(1), Some((&"better", 1.5)));
}

#[test]
fn test_zero_capacity_rejects() {
    let mut list = RankedList::new(0);
    assert!(!list.check(10.0));
    assert!(!list.add(10.0, ()));
    assert!(list.is_empty());
}

#[test]
fn test_truncated_copy() {
    let mut list = RankedList::new(5);
    for i in 0..5 {
        list.add(i as f64, i);
    }
    let top2 = list.truncated(2);
    assert_eq!(top2.max_size(), 2);
    assert_eq!(top2.into_vec(), vec![(4, 4.0), (3, 3.0)]);
}
