/// Snapshot and artifact naming
///
/// Names are plain `.`-joined fields. Artifact names carry exactly four
/// fields before the extension so a repository listing can be mapped back to
/// the run, volume, instance and node that produced each file.
use regex::Regex;

use crate::utils::{NAME_SEPARATOR, NAME_SEPARATOR_REPLACEMENT};

/// `<lv>.<run_id>.<snap_ext>`
pub fn snapshot_name(lv_name: &str, run_id: &str, snap_ext: &str) -> String {
    join(&[lv_name, run_id, snap_ext])
}

/// `<run_id>.<lv>.<instance>.<node>.<art_ext>`
pub fn artifact_name(
    run_id: &str,
    lv_name: &str,
    instance_name: &str,
    node_name: &str,
    art_ext: &str,
) -> String {
    join(&[run_id, lv_name, instance_name, node_name, art_ext])
}

/// Shell glob selecting artifacts of any run
///
/// `*` also matches the separator, so the glob accepts names with empty or
/// extra fields. It is a pre-filter, `prune_regex` decides.
pub fn prune_glob(art_ext: &str) -> String {
    format!("*.*.*.*.{}", art_ext)
}

/// POSIX extended regex for `find -regex`, matched against the whole path
pub fn prune_regex(art_ext: &str) -> String {
    format!(".*/{}", artifact_pattern(art_ext))
}

/// Exact artifact shape: four non-empty fields without separator, then the extension
pub fn matches_prune_pattern(name: &str, art_ext: &str) -> bool {
    artifact_regex(art_ext).is_match(name)
}

/// Make a value usable as an artifact name field.
///
/// Ganeti LV names (`<uuid>.disk0`) and FQDN instance names contain the
/// separator, which would make the artifact name ambiguous.
pub fn sanitize_field(value: &str) -> String {
    value.replace(NAME_SEPARATOR, &NAME_SEPARATOR_REPLACEMENT.to_string())
}

/// Fields of an artifact file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub run_id: String,
    pub lv_name: String,
    pub instance_name: String,
    pub node_name: String,
}

impl ArtifactName {
    pub fn parse(name: &str, art_ext: &str) -> Option<Self> {
        let caps = artifact_regex(art_ext).captures(name)?;

        Some(Self {
            run_id: caps[1].to_string(),
            lv_name: caps[2].to_string(),
            instance_name: caps[3].to_string(),
            node_name: caps[4].to_string(),
        })
    }

    pub fn file_name(&self, art_ext: &str) -> String {
        artifact_name(
            &self.run_id,
            &self.lv_name,
            &self.instance_name,
            &self.node_name,
            art_ext,
        )
    }
}

fn join(fields: &[&str]) -> String {
    fields.join(&NAME_SEPARATOR.to_string())
}

/// Shared by the `find` filter and `ArtifactName::parse`, so only syntax
/// common to POSIX ERE and the regex crate is used. The extension is
/// restricted to `[A-Za-z0-9_-]` by `RunContextBuilder::build`.
fn artifact_pattern(art_ext: &str) -> String {
    let field = r"([^./]+)";
    format!(
        r"{field}\.{field}\.{field}\.{field}\.{ext}",
        field = field,
        ext = art_ext
    )
}

fn artifact_regex(art_ext: &str) -> Regex {
    // Only the extension is variable
    Regex::new(&format!("^{}$", artifact_pattern(art_ext)))
        .expect("artifact pattern is a valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_name() {
        assert_eq!(snapshot_name("lv0", "2024-01-01-00", "bak"), "lv0.2024-01-01-00.bak");
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            artifact_name("2024-01-01-00", "lv0", "vm1", "node1", "raw"),
            "2024-01-01-00.lv0.vm1.node1.raw"
        );
    }

    #[test]
    fn test_names_are_deterministic() {
        let fields = [
            ("r1", "lv0", "vm1", "node1"),
            ("2024-01-01-00", "3f0c-uuid_disk0", "web", "hv-03"),
            ("x", "y", "z", "w"),
        ];

        for (run, lv, inst, node) in fields {
            assert_eq!(
                artifact_name(run, lv, inst, node, "raw"),
                artifact_name(run, lv, inst, node, "raw")
            );
            assert_eq!(snapshot_name(lv, run, "bak"), snapshot_name(lv, run, "bak"));
        }
    }

    #[test]
    fn test_prune_filters() {
        assert_eq!(prune_glob("raw"), "*.*.*.*.raw");
        assert_eq!(
            prune_regex("raw"),
            r".*/([^./]+)\.([^./]+)\.([^./]+)\.([^./]+)\.raw"
        );
    }

    #[test]
    fn test_pattern_accepts_every_artifact_name() {
        let fields = [
            ("2024-01-01-00", "lv0", "vm1", "node1"),
            ("nightly", "3f0c-uuid_disk0", "vm1_example_com", "hv1"),
            ("a", "b", "c", "d"),
        ];

        for (run, lv, inst, node) in fields {
            let name = artifact_name(run, lv, inst, node, "raw");
            assert!(matches_prune_pattern(&name, "raw"), "{}", name);
        }
    }

    #[test]
    fn test_pattern_rejects_other_shapes() {
        assert!(!matches_prune_pattern("a.b.c.raw", "raw"));
        assert!(!matches_prune_pattern("a.b.c.d.e.raw", "raw"));
        assert!(!matches_prune_pattern("a.b.c.d.img", "raw"));
        assert!(!matches_prune_pattern("a.b.c.d.raw.gz", "raw"));
        assert!(!matches_prune_pattern("a..c.d.raw", "raw"));
        assert!(!matches_prune_pattern("....raw", "raw"));
        assert!(!matches_prune_pattern("raw", "raw"));
    }

    #[test]
    fn test_pattern_allows_dash_in_extension() {
        assert!(matches_prune_pattern("a.b.c.d.raw-lz4", "raw-lz4"));
        assert!(!matches_prune_pattern("a.b.c.d.raw", "raw-lz4"));
    }

    #[test]
    fn test_parse_artifact_name() {
        let parsed = ArtifactName::parse("2024-01-01-00.lv0.vm1.node1.raw", "raw").unwrap();

        assert_eq!(parsed.run_id, "2024-01-01-00");
        assert_eq!(parsed.lv_name, "lv0");
        assert_eq!(parsed.instance_name, "vm1");
        assert_eq!(parsed.node_name, "node1");
        assert_eq!(parsed.file_name("raw"), "2024-01-01-00.lv0.vm1.node1.raw");

        assert!(ArtifactName::parse("2024-01-01-00.lv0.vm1.node1.img", "raw").is_none());
        assert!(ArtifactName::parse("lv0.2024-01-01-00.bak", "bak").is_none());
    }

    #[test]
    fn test_sanitize_field() {
        assert_eq!(sanitize_field("vm1.example.com"), "vm1_example_com");
        assert_eq!(sanitize_field("3f0c-uuid.disk0"), "3f0c-uuid_disk0");
        assert_eq!(sanitize_field("lv0"), "lv0");
    }
}
