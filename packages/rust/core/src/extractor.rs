//! Per-group subgraph extraction.
//!
//! For every intrusion-set in a corpus, collects the group, its 1-hop
//! relationships and their far ends into a standalone bundle and writes it
//! to `<output_dir>/<sanitized-name>_<group-id>.json`.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use stixkit_ingest::{LoadedBundle, load_bundle};
use stixkit_shared::{
    Bundle, ExtractConfig, Result, StixCommon, StixKitError, StixObject, to_pretty_json,
    write_atomic,
};

use crate::pipeline::ProgressReporter;
use crate::resolver::ObjectIndex;

/// Display name used when a group has none.
const UNKNOWN_GROUP_NAME: &str = "unknown_group";

/// One group's assembled bundle, not yet written.
#[derive(Debug)]
pub struct GroupBundle<'a> {
    pub group_name: String,
    pub group_id: String,
    /// MITRE group code (e.g. `G0007`), if referenced.
    pub mitre_id: Option<String>,
    /// `<sanitized-name>_<group-id>.json`
    pub file_name: String,
    pub bundle: Bundle<&'a StixObject>,
}

/// A bundle file that was written.
#[derive(Debug, Clone)]
pub struct WrittenBundle {
    pub group_name: String,
    pub group_id: String,
    pub mitre_id: Option<String>,
    pub path: PathBuf,
    pub object_count: usize,
}

/// A group whose bundle was not produced.
#[derive(Debug, Clone)]
pub struct GroupFailure {
    pub group: String,
    pub error: String,
}

/// Summary of an extraction run.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Intrusion-sets in the corpus.
    pub groups_found: usize,
    pub written: Vec<WrittenBundle>,
    /// Groups skipped because their bundle could not be assembled.
    pub build_failures: Vec<GroupFailure>,
    /// Groups whose bundle could not be written.
    pub write_failures: Vec<GroupFailure>,
    /// Input objects dropped by the loader.
    pub skipped_objects: usize,
    pub elapsed: std::time::Duration,
}

/// Make a group name or id safe to embed in a file name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// File name for a group's bundle.
pub fn group_file_name(name: &str, id: &str) -> String {
    format!("{}_{}.json", sanitize_name(name), sanitize_name(id))
}

/// Join `file_name` onto `dir`, refusing anything that would land elsewhere.
fn output_path(dir: &Path, group: &str, file_name: &str) -> Result<PathBuf> {
    let mut components = Path::new(file_name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    let path = dir.join(file_name);
    if !single || path.parent() != Some(dir) {
        return Err(StixKitError::bundle_build(
            group,
            format!("file name {file_name:?} escapes {}", dir.display()),
        ));
    }
    Ok(path)
}

/// Assemble the bundle for one group: the group itself, then its
/// relationships, then the objects they reach, each id kept once.
pub fn build_group_bundle<'a>(
    index: &ObjectIndex<'a>,
    group: &'a StixObject,
) -> Result<GroupBundle<'a>> {
    let group_name = group.name().unwrap_or(UNKNOWN_GROUP_NAME).to_string();
    let group_id = group.id();
    if group_id.is_empty() {
        return Err(StixKitError::bundle_build(&group_name, "group has no id"));
    }

    let resolution = index.resolve(group_id);
    if resolution.dangling > 0 {
        debug!(group = %group_name, dangling = resolution.dangling, "unresolved references");
    }

    let candidates = std::iter::once(group)
        .chain(resolution.relationships)
        .chain(resolution.related);

    let mut seen = HashSet::new();
    let objects: Vec<&StixObject> = candidates
        .filter(|&obj| {
            let id = obj.id();
            !id.is_empty() && seen.insert(id)
        })
        .collect();

    Ok(GroupBundle {
        file_name: group_file_name(&group_name, group_id),
        mitre_id: group.mitre_id(),
        group_id: group_id.to_string(),
        group_name,
        bundle: Bundle::new(objects),
    })
}

/// Writes one bundle per adversary group.
pub struct Extractor {
    config: ExtractConfig,
}

impl Extractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Load the configured input bundle and extract every group from it.
    ///
    /// Fails only if the input cannot be loaded or the output directory
    /// cannot be created; per-group problems are recorded in the report.
    #[instrument(skip_all, fields(input = %self.config.input_file.display()))]
    pub fn run(&self, progress: &dyn ProgressReporter) -> Result<ExtractReport> {
        progress.phase("Loading bundle");
        let corpus = load_bundle(&self.config.input_file)?;
        self.extract_all(&corpus, progress)
    }

    /// Extract every group of an already-loaded corpus.
    #[instrument(skip_all, fields(output = %self.config.output_dir.display(), objects = corpus.objects.len()))]
    pub fn extract_all(
        &self,
        corpus: &LoadedBundle,
        progress: &dyn ProgressReporter,
    ) -> Result<ExtractReport> {
        let start = Instant::now();
        let groups: Vec<&StixObject> = corpus.intrusion_sets().collect();

        let mut report = ExtractReport {
            groups_found: groups.len(),
            skipped_objects: corpus.skipped_count(),
            ..Default::default()
        };

        if groups.is_empty() {
            warn!("no intrusion sets found in bundle");
            report.elapsed = start.elapsed();
            return Ok(report);
        }

        info!(groups = groups.len(), "extracting adversary groups");
        progress.phase("Extracting groups");

        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| StixKitError::io(&self.config.output_dir, e))?;

        let index = ObjectIndex::build(&corpus.objects);
        let total = groups.len();

        for (i, group) in groups.into_iter().enumerate() {
            let name = group.name().unwrap_or(UNKNOWN_GROUP_NAME);
            progress.group_extracted(name, i + 1, total);

            let built = build_group_bundle(&index, group).and_then(|gb| {
                let path = output_path(&self.config.output_dir, &gb.group_name, &gb.file_name)?;
                let json = to_pretty_json(&gb.bundle)
                    .map_err(|e| StixKitError::bundle_build(&gb.group_name, e.to_string()))?;
                Ok((gb, path, json))
            });

            let (group_bundle, path, json) = match built {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(group = %name, error = %e, "skipping group");
                    report.build_failures.push(GroupFailure {
                        group: name.to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = write_atomic(&path, |w| w.write_all(json.as_bytes())) {
                warn!(group = %name, error = %e, "failed to write group bundle");
                report.write_failures.push(GroupFailure {
                    group: name.to_string(),
                    error: e.to_string(),
                });
                continue;
            }

            let object_count = group_bundle.bundle.objects.len();
            info!(
                current = i + 1,
                total,
                file = %group_bundle.file_name,
                objects = object_count,
                "wrote group bundle"
            );

            report.written.push(WrittenBundle {
                group_name: group_bundle.group_name,
                group_id: group_bundle.group_id,
                mitre_id: group_bundle.mitre_id,
                path,
                object_count,
            });
        }

        report.elapsed = start.elapsed();
        info!(
            written = report.written.len(),
            build_failures = report.build_failures.len(),
            write_failures = report.write_failures.len(),
            elapsed_ms = report.elapsed.as_millis(),
            "extraction complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use serde_json::{Value, json};
    use stixkit_ingest::load_bundle_from_str;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stixkit-extract-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn corpus(objects: Value) -> LoadedBundle {
        load_bundle_from_str(&json!({"type": "bundle", "id": "bundle--in", "objects": objects}).to_string())
            .unwrap()
    }

    fn written_ids(path: &Path) -> Vec<String> {
        let bundle: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(bundle["type"], "bundle");
        bundle["objects"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn scenario_yields_five_objects_in_order() {
        let tmp = temp_dir();
        let extractor = Extractor::new(ExtractConfig {
            input_file: PathBuf::from("../../../fixtures/json/scenario.bundle.json"),
            output_dir: tmp.clone(),
        });

        let report = extractor.run(&SilentProgress).unwrap();

        assert_eq!(report.groups_found, 1);
        assert_eq!(report.written.len(), 1);
        let written = &report.written[0];
        assert_eq!(written.object_count, 5);
        assert_eq!(written.path, tmp.join("G1_IS-1.json"));
        assert_eq!(written_ids(&written.path), ["IS-1", "R1", "R2", "AP-1", "AP-2"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn object_reached_twice_appears_once() {
        let loaded = corpus(json!([
            {"type": "intrusion-set", "id": "IS-1", "name": "G1"},
            {"type": "attack-pattern", "id": "AP-1", "name": "T"},
            {"type": "relationship", "id": "R1", "relationship_type": "uses", "source_ref": "IS-1", "target_ref": "AP-1"},
            {"type": "relationship", "id": "R2", "relationship_type": "targets", "source_ref": "IS-1", "target_ref": "AP-1"},
            {"type": "relationship", "id": "R3", "relationship_type": "related-to", "source_ref": "AP-1", "target_ref": "IS-1"}
        ]));
        let index = ObjectIndex::build(&loaded.objects);
        let group = loaded.intrusion_sets().next().unwrap();

        let gb = build_group_bundle(&index, group).unwrap();
        let ids: Vec<&str> = gb.bundle.objects.iter().map(|o| o.id()).collect();
        assert_eq!(ids, ["IS-1", "R1", "R2", "R3", "AP-1"]);
    }

    #[test]
    fn reverse_relationships_are_included() {
        let loaded = load_bundle(Path::new("../../../fixtures/json/mitre-sample.bundle.json")).unwrap();
        let index = ObjectIndex::build(&loaded.objects);
        let group = loaded
            .intrusion_sets()
            .find(|g| g.name() == Some("Threat Group/3390"))
            .unwrap();

        let gb = build_group_bundle(&index, group).unwrap();
        assert_eq!(
            gb.file_name,
            "Threat_Group_3390_intrusion-set--0bbdf25b-30ff-4894-a1cd-49260d0dd2d9.json"
        );
        assert_eq!(gb.mitre_id.as_deref(), Some("G0027"));
        // forward edge, reverse edge with a dangling source, one resolved technique
        let ids: Vec<&str> = gb.bundle.objects.iter().map(|o| o.id()).collect();
        assert_eq!(
            ids,
            [
                "intrusion-set--0bbdf25b-30ff-4894-a1cd-49260d0dd2d9",
                "relationship--a1b2c3d4-0003-4000-8000-000000000003",
                "relationship--a1b2c3d4-0004-4000-8000-000000000004",
                "attack-pattern--3ccef7ae-cb5e-48f6-8302-897105fbf55c",
            ]
        );
    }

    #[test]
    fn each_group_gets_its_own_file() {
        let tmp = temp_dir();
        let extractor = Extractor::new(ExtractConfig {
            input_file: PathBuf::from("../../../fixtures/json/mitre-sample.bundle.json"),
            output_dir: tmp.join("adversaries"),
        });

        let report = extractor.run(&SilentProgress).unwrap();

        assert_eq!(report.groups_found, 2);
        assert_eq!(report.written.len(), 2);
        // x-mitre-tactic is not a standard type
        assert_eq!(report.skipped_objects, 1);

        let apt28 = &report.written[0];
        assert_eq!(apt28.group_name, "APT28");
        assert_eq!(apt28.mitre_id.as_deref(), Some("G0007"));
        assert_eq!(apt28.object_count, 5);

        let bundle: Value =
            serde_json::from_str(&std::fs::read_to_string(&apt28.path).unwrap()).unwrap();
        assert!(bundle["id"].as_str().unwrap().starts_with("bundle--"));
        assert_ne!(bundle["id"], "bundle--0c3e5a43-0f3f-4bb4-8f43-5e52a3c1e2d7");
        assert_eq!(bundle["objects"][0]["x_mitre_version"], "5.0");
        assert_eq!(bundle["objects"][0]["aliases"][1], "Fancy Bear");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn no_groups_writes_nothing() {
        let tmp = temp_dir();
        let out = tmp.join("adversaries");
        let extractor = Extractor::new(ExtractConfig {
            input_file: tmp.join("unused.json"),
            output_dir: out.clone(),
        });
        let loaded = corpus(json!([{"type": "attack-pattern", "id": "AP-1", "name": "T"}]));

        let report = extractor.extract_all(&loaded, &SilentProgress).unwrap();

        assert_eq!(report.groups_found, 0);
        assert!(report.written.is_empty());
        assert!(!out.exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn group_without_id_is_skipped_others_proceed() {
        let tmp = temp_dir();
        let extractor = Extractor::new(ExtractConfig {
            input_file: tmp.join("unused.json"),
            output_dir: tmp.clone(),
        });
        let loaded = corpus(json!([
            {"type": "intrusion-set", "name": "Nameless Id"},
            {"type": "intrusion-set", "id": "IS-2", "name": "G2"}
        ]));

        let report = extractor.extract_all(&loaded, &SilentProgress).unwrap();

        assert_eq!(report.groups_found, 2);
        assert_eq!(report.build_failures.len(), 1);
        assert_eq!(report.build_failures[0].group, "Nameless Id");
        assert_eq!(report.written.len(), 1);
        assert_eq!(written_ids(&report.written[0].path), ["IS-2"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_input_is_fatal() {
        let tmp = temp_dir();
        let extractor = Extractor::new(ExtractConfig {
            input_file: tmp.join("missing.json"),
            output_dir: tmp.join("out"),
        });

        let err = extractor.run(&SilentProgress).unwrap_err();
        assert!(matches!(err, StixKitError::Load { .. }));
        assert!(!tmp.join("out").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn sanitizes_spaces_and_separators() {
        assert_eq!(sanitize_name("Threat Group/3390"), "Threat_Group_3390");
        assert_eq!(sanitize_name(r"APT\29 x"), "APT_29_x");
        assert_eq!(group_file_name("G 1", "IS-1"), "G_1_IS-1.json");
        assert_eq!(group_file_name("G1", "../../../escaped"), "G1_.._.._.._escaped.json");
    }

    #[test]
    fn group_id_cannot_escape_output_dir() {
        let tmp = temp_dir();
        let out = tmp.join("a").join("b").join("c");
        let extractor = Extractor::new(ExtractConfig {
            input_file: tmp.join("unused.json"),
            output_dir: out.clone(),
        });
        let loaded = corpus(json!([
            {"type": "intrusion-set", "id": "../../../escaped", "name": "G1"}
        ]));

        let report = extractor.extract_all(&loaded, &SilentProgress).unwrap();

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.written[0].path, out.join("G1_.._.._.._escaped.json"));
        assert!(report.written[0].path.is_file());
        assert!(!tmp.join("escaped.json").exists());
        let entries: Vec<_> = std::fs::read_dir(&tmp).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn output_path_rejects_anything_but_a_plain_name() {
        let dir = Path::new("/data/stix_adversaries");
        assert_eq!(
            output_path(dir, "G1", "G1_IS-1.json").unwrap(),
            dir.join("G1_IS-1.json")
        );
        for bad in ["../G1.json", "sub/G1.json", "..", "/etc/G1.json", ""] {
            let err = output_path(dir, "G1", bad).unwrap_err();
            assert!(matches!(err, StixKitError::BundleBuild { .. }), "{bad}");
        }
    }

    #[test]
    fn written_objects_match_their_input_exactly() {
        let group = r#"{"id":"IS-1","type":"intrusion-set","created":"2017-05-31T21:31:48.000Z","name":"G1"}"#;
        let pattern = r#"{"type":"attack-pattern","id":"AP-1","name":"T","description":null,"kill_chain_phases":[{"kill_chain_name":"mitre-attack","phase_name":"execution","x_custom_phase":"p1"}],"external_references":[{"source_name":"mitre-attack","external_id":null}]}"#;
        let edge = r#"{"type":"relationship","id":"R1","relationship_type":"uses","source_ref":"IS-1","target_ref":"AP-1"}"#;
        let loaded = load_bundle_from_str(&format!(
            r#"{{"type":"bundle","id":"bundle--in","objects":[{group},{pattern},{edge}]}}"#
        ))
        .unwrap();
        let index = ObjectIndex::build(&loaded.objects);
        let gb = build_group_bundle(&index, loaded.intrusion_sets().next().unwrap()).unwrap();

        let bundle: Value = serde_json::from_str(&to_pretty_json(&gb.bundle).unwrap()).unwrap();
        let objects: Vec<String> = bundle["objects"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| serde_json::to_string(o).unwrap())
            .collect();

        assert_eq!(objects, [group, edge, pattern]);
        let keys: Vec<&str> = bundle["objects"][0]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["id", "type", "created", "name"]);
    }
}
