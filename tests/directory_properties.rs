//! Property tests for the feed directory.

use proptest::prelude::*;

use feedstash::storage::{Directory, DirectoryError, FeedRef};

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{0,15}"
}

proptest! {
    #[test]
    fn add_category_grows_by_one(names in prop::collection::vec(name(), 0..20), extra in name()) {
        let mut dir = Directory::new();
        for n in &names {
            dir.add_category(n, "").unwrap();
        }
        let before = dir.categories().len();
        dir.add_category(&extra, "").unwrap();

        prop_assert_eq!(dir.categories().len(), before + 1);
        prop_assert_eq!(&dir.categories()[before].name, &extra);
        prop_assert!(dir.feeds(&extra).is_ok());
    }

    #[test]
    fn added_feed_resolves_in_its_category(category in name(), feed in name(), path in "[a-z]{1,12}") {
        let mut dir = Directory::new();
        dir.add_category(&category, "").unwrap();
        let url = format!("https://feeds.example/{path}");
        dir.add_feed(&category, &feed, &url).unwrap();

        prop_assert_eq!(dir.resolve(&FeedRef::in_category(category.clone(), feed.clone())).unwrap(), url.as_str());
        prop_assert!(dir.feeds(&category).unwrap().iter().any(|f| f.name == feed));
    }

    #[test]
    fn deleted_category_is_not_found(names in prop::collection::vec(name(), 1..10), pick in any::<prop::sample::Index>()) {
        let mut dir = Directory::new();
        for n in &names {
            dir.add_category(n, "").unwrap();
        }
        let target = pick.get(&names).clone();
        let copies = names.iter().filter(|n| **n == target).count();

        for _ in 0..copies {
            prop_assert!(dir.delete_category(&target));
        }
        prop_assert_eq!(dir.categories().len(), names.len() - copies);
        prop_assert!(matches!(dir.feeds(&target), Err(DirectoryError::CategoryNotFound(_))));
        prop_assert!(!dir.delete_category(&target));
    }

    #[test]
    fn toml_round_trip(names in prop::collection::vec(name(), 0..8)) {
        let mut dir = Directory::new();
        for (i, n) in names.iter().enumerate() {
            dir.add_category(n, "desc").unwrap();
            dir.add_feed(n, "feed", &format!("https://f{i}.example/rss")).unwrap();
        }
        let toml = dir.to_toml().unwrap();
        let parsed: toml::Value = toml::from_str(&toml).unwrap();
        let categories = parsed.get("categories").and_then(|c| c.as_array()).map_or(0, |a| a.len());
        prop_assert_eq!(categories, names.len());
    }
}
