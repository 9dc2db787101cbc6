//! Ranking and grouping shared by both storage engines.

use postwatch_core::{Author, Item};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub fn sort_by_id(items: &mut [Item]) {
    items.sort_by(|a, b| a.id.cmp(&b.id));
}

/// Highest `ups` first, ties by id.
pub fn rank_by_score(items: &mut [Item]) {
    items.sort_by(|a, b| b.ups.cmp(&a.ups).then_with(|| a.id.cmp(&b.id)));
}

pub fn rank_by_comments(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.num_comments
            .cmp(&a.num_comments)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Drops unrated items, then orders by ratio, score and id ascending.
pub fn rank_by_ratio(items: Vec<Item>) -> Vec<Item> {
    let mut rated: Vec<Item> = items.into_iter().filter(Item::is_rated).collect();
    rated.sort_by(compare_ratio);
    rated
}

fn compare_ratio(a: &Item, b: &Item) -> Ordering {
    a.upvote_ratio
        .total_cmp(&b.upvote_ratio)
        .then_with(|| a.score.cmp(&b.score))
        .then_with(|| a.id.cmp(&b.id))
}

/// Groups items by author name, ordered by name with posts ordered by id.
/// Items without an author are left out.
pub fn group_authors(items: impl IntoIterator<Item = Item>) -> Vec<Author> {
    let mut grouped: BTreeMap<String, Vec<Item>> = BTreeMap::new();
    for item in items {
        if item.author.is_empty() {
            continue;
        }
        grouped.entry(item.author.clone()).or_default().push(item);
    }
    grouped
        .into_iter()
        .map(|(name, mut posts)| {
            sort_by_id(&mut posts);
            Author { name, posts }
        })
        .collect()
}

/// Most posts first, ties by name.
pub fn rank_authors(authors: &mut [Author]) {
    authors.sort_by(|a, b| {
        b.post_count()
            .cmp(&a.post_count())
            .then_with(|| a.name.cmp(&b.name))
    });
}

pub fn take<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    items.iter().take(n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, ups: i64, comments: i64, ratio: f64) -> Item {
        let mut item = Item::new(id, "gaming").with_ups(ups);
        item.num_comments = comments;
        item.upvote_ratio = ratio;
        item
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_score_ranking_breaks_ties_by_id() {
        let mut items = vec![item("c", 5, 0, 0.5), item("a", 5, 0, 0.5), item("b", 9, 0, 0.5)];
        rank_by_score(&mut items);
        assert_eq!(ids(&items), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_comment_ranking() {
        let mut items = vec![item("a", 1, 2, 0.5), item("b", 1, 7, 0.5), item("c", 1, 7, 0.5)];
        rank_by_comments(&mut items);
        assert_eq!(ids(&items), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ratio_ranking_excludes_unrated() {
        let unrated = item("z", 0, 0, 0.0);
        let items = vec![
            item("a", 10, 0, 0.9),
            item("b", 3, 0, 0.4),
            item("c", 1, 0, 0.4),
            unrated,
        ];
        let ranked = rank_by_ratio(items);
        assert_eq!(ids(&ranked), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_group_and_rank_authors() {
        let items = vec![
            item("b", 1, 0, 0.5).with_author("zed"),
            item("a", 1, 0, 0.5).with_author("zed"),
            item("c", 1, 0, 0.5).with_author("amy"),
            item("d", 1, 0, 0.5),
        ];
        let mut authors = group_authors(items);
        assert_eq!(authors.len(), 2);
        assert_eq!(authors[0].name, "amy");
        assert_eq!(ids(&authors[1].posts), vec!["a", "b"]);

        rank_authors(&mut authors);
        assert_eq!(authors[0].name, "zed");
        assert_eq!(authors[0].post_count(), 2);
    }
}
