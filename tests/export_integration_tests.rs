//! Integration tests for the mlox and interchange formats and file persistence

use camino::Utf8PathBuf;
use mloxmaker::services::{
    MloxWriter, RuleStore, YamlRuleStore, from_interchange, import_mlox, load_rule_set, save_rule_set,
    to_interchange,
};
use mloxmaker::{ConflictSeverity, ModSource, RuleDraft, RuleKind, RuleSet};
use std::fs;
use tempfile::TempDir;

fn sample_rule_set() -> RuleSet {
    let mut rule_set = RuleSet::new();
    rule_set.upsert_mod("Morrowind.esm", Some("7b6af5e9"), ModSource::Local).unwrap();
    rule_set.upsert_mod("Tribunal.esm", None, ModSource::Local).unwrap();
    rule_set.upsert_mod("Better Bodies.esp", None, ModSource::Remote).unwrap();
    rule_set.upsert_mod("Robe Overhaul.esp", None, ModSource::Remote).unwrap();

    rule_set
        .add_rule(RuleDraft::requires("Tribunal.esm", "Morrowind.esm"))
        .unwrap();
    rule_set
        .add_rule(RuleDraft::order("Better Bodies.esp", "Robe Overhaul.esp").with_notes("Robes replace body meshes"))
        .unwrap();
    rule_set
        .add_rule(
            RuleDraft::conflict("Better Bodies.esp", "Robe Overhaul.esp")
                .with_severity(ConflictSeverity::Medium)
                .with_reference("https://mw.modhistory.com/"),
        )
        .unwrap();
    rule_set
}

#[test]
fn test_mlox_export_has_one_block_per_rule() {
    let text = MloxWriter::new().write(&sample_rule_set());

    assert!(text.starts_with("; mlox rules generated by MLOXMaker"));
    assert_eq!(text.matches("[Requires]").count(), 1);
    assert_eq!(text.matches("[Order]").count(), 1);
    assert_eq!(text.matches("[Conflict]").count(), 1);
    assert!(text.contains("; Robes replace body meshes"));
    assert!(text.contains("; Ref: https://mw.modhistory.com/"));
    assert!(text.contains(" !! "));
}

#[test]
fn test_mlox_export_reimports_to_same_rules() {
    let original = sample_rule_set();
    let text = MloxWriter::new().write(&original);

    let mut reimported = RuleSet::new();
    let report = import_mlox(&mut reimported, &text);
    assert!(report.is_clean(), "Rejected: {:?}", report.rejected);
    assert_eq!(report.accepted.len(), original.rule_count());

    let kinds: Vec<RuleKind> = reimported.rules().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RuleKind::Requires, RuleKind::Order, RuleKind::Conflict]);
    let conflict = reimported.rules().last().unwrap();
    assert_eq!(conflict.severity, Some(ConflictSeverity::Medium));
    assert_eq!(conflict.reference.as_deref(), Some("https://mw.modhistory.com/"));
}

#[test]
fn test_interchange_round_trip() {
    let original = sample_rule_set();
    let text = to_interchange(&original).unwrap();
    let restored = from_interchange(&text).unwrap();

    assert_eq!(restored, original);
    assert_eq!(restored.find_mod("morrowind.esm").unwrap().hash.as_deref(), Some("7b6af5e9"));
}

#[test]
fn test_interchange_rejects_cyclic_document() {
    let text = "\
- record: mod
  id: 1
  name: A.esp
  source: local
- record: mod
  id: 2
  name: B.esp
  source: local
- record: rule
  id: 1
  kind: requires
  subject: A.esp
  target: B.esp
- record: rule
  id: 2
  kind: requires
  subject: B.esp
  target: A.esp
";
    assert!(from_interchange(text).is_err());
}

#[test]
fn test_yaml_store_persists_across_instances() {
    let temp_dir = TempDir::new().unwrap();
    let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let path = dir.join("nested").join("ruleset.yaml");

    let original = sample_rule_set();
    save_rule_set(&YamlRuleStore::new(&path), &original).unwrap();
    assert!(path.exists());

    let store = YamlRuleStore::new(&path);
    let records = store.load_all().unwrap();
    assert_eq!(records.mods.len(), 4);
    assert_eq!(records.rules.len(), 3);

    let loaded = load_rule_set(&store).unwrap();
    assert_eq!(loaded, original);
}

#[test]
fn test_exported_file_matches_writer_output() {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().join("mlox_user.txt")).unwrap();
    let rule_set = sample_rule_set();

    let writer = MloxWriter::new().with_comments(false);
    writer.write_to_file(&rule_set, &path).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert_eq!(written, writer.write(&rule_set));
    assert!(!written.contains("; Ref:"));
}
