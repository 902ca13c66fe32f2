use std::collections::HashSet;

/// First-seen order, blanks dropped.
pub fn unique_strings<I, S>(list: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in list {
        let item = item.as_ref();
        if item.is_empty() {
            continue;
        }
        if seen.insert(item.to_string()) {
            out.push(item.to_string());
        }
    }
    out
}

/// Final URL list for a record: kept minus removed, then the fresh uploads.
pub fn compute_final_urls(kept: &[String], removed: &[String], uploaded: &[String]) -> Vec<String> {
    let removed: HashSet<&str> = removed.iter().map(String::as_str).collect();
    let cleaned = unique_strings(kept)
        .into_iter()
        .filter(|url| !removed.contains(url.as_str()));
    unique_strings(cleaned.chain(uploaded.iter().cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unique_strings_keeps_first_seen_order() {
        assert_eq!(unique_strings(["b", "a", "", "b", "c", "a"]), v(&["b", "a", "c"]));
    }

    #[test]
    fn removed_urls_are_excluded_wherever_they_appear() {
        let kept = v(&["u1", "u2", "u1", "u3"]);
        let removed = v(&["u1", "zz"]);
        let uploaded = v(&["n1"]);
        assert_eq!(compute_final_urls(&kept, &removed, &uploaded), v(&["u2", "u3", "n1"]));
    }

    #[test]
    fn uploaded_urls_always_survive() {
        // removal only applies to kept urls
        let kept = v(&["a"]);
        let removed = v(&["n1"]);
        let uploaded = v(&["n1", "n1", "a"]);
        assert_eq!(compute_final_urls(&kept, &removed, &uploaded), v(&["a", "n1"]));
    }

    #[test]
    fn result_has_no_duplicates_and_is_idempotent() {
        let kept = v(&["x", "y", "x", "z", "y"]);
        let removed = v(&["z"]);
        let uploaded = v(&["w", "x"]);
        let once = compute_final_urls(&kept, &removed, &uploaded);
        let set: HashSet<&String> = once.iter().collect();
        assert_eq!(set.len(), once.len());
        assert_eq!(once, v(&["x", "y", "w"]));

        let twice = compute_final_urls(&once, &removed, &uploaded);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_inputs() {
        assert!(compute_final_urls(&[], &[], &[]).is_empty());
    }
}
