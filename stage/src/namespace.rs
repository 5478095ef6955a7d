//! Namespace allocation for imported references.

use pini_pipe::output::Output;

/// First free namespace derived from a base: the base itself if unused,
/// else the base with the lowest free numeric suffix ("deer", "deer1",
/// "deer2", ...).
pub fn next_namespace(base: &str, taken: &[String]) -> String {
    if !taken.iter().any(|ns| ns == base) {
        return base.to_string();
    }
    let mut idx = 1u32;
    loop {
        let candidate = format!("{base}{idx}");
        if !taken.iter().any(|ns| ns == &candidate) {
            return candidate;
        }
        idx += 1;
    }
}

/// Allocate a namespace for an output being imported.
///
/// An attach target fixes the namespace to `<target>_shd` with no
/// conflict resolution; otherwise the output's namespace base (optionally
/// overridden) is suffixed clear of both live and already-staged
/// namespaces.
pub fn output_to_namespace(
    output: &Output,
    attach_to: Option<&str>,
    ignore: &[String],
    base: Option<&str>,
    live: &[String],
) -> String {
    if let Some(target) = attach_to {
        return format!("{target}_shd");
    }

    let base = match base {
        Some(base) => base.to_string(),
        None => output.namespace_base(),
    };
    let mut taken: Vec<String> = live.to_vec();
    taken.extend(ignore.iter().cloned());
    next_namespace(&base, &taken)
}

#[cfg(test)]
mod namespace_test {
    use super::*;
    use pini_pipe::output::ContentType;

    fn strs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn free_base_is_used_directly() {
        assert_eq!(next_namespace("deer", &[]), "deer");
        assert_eq!(next_namespace("deer", &strs(&["fox"])), "deer");
    }

    #[test]
    fn taken_bases_get_numeric_suffixes() {
        assert_eq!(next_namespace("deer", &strs(&["deer"])), "deer1");
        assert_eq!(next_namespace("deer", &strs(&["deer", "deer1"])), "deer2");
    }

    #[test]
    fn attach_target_fixes_namespace() {
        let lookdev = Output::new(
            "/jobs/x/deer_lookdev.ma",
            "deer",
            "lookdev",
            ContentType::Lookdev,
        );
        let ns = output_to_namespace(&lookdev, Some("deer01"), &[], None, &strs(&["deer01"]));
        assert_eq!(ns, "deer01_shd");
    }

    #[test]
    fn staged_namespaces_count_as_taken() {
        let cache = Output::new("/jobs/x/deer01.abc", "deer", "deer01", ContentType::GeoAbc);
        let ns = output_to_namespace(&cache, None, &strs(&["deer01"]), None, &[]);
        assert_eq!(ns, "deer011");
    }
}
