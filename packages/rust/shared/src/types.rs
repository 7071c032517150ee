//! STIX domain types: objects, relationships, external references, bundles.
//!
//! Objects are decoded once from JSON and never mutated afterwards. Typed
//! variants are read-only views: each keeps the property map it was decoded
//! from, and serialization writes that map back, so nulls, nested custom
//! properties and field order all survive unchanged.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// An untyped STIX object: the raw property map as it appeared in the input.
pub type RawObject = serde_json::Map<String, Value>;

/// Type discriminators the engine cares about.
pub mod kinds {
    pub const INTRUSION_SET: &str = "intrusion-set";
    pub const ATTACK_PATTERN: &str = "attack-pattern";
    pub const CAMPAIGN: &str = "campaign";
    pub const RELATIONSHIP: &str = "relationship";
    pub const BUNDLE: &str = "bundle";
}

/// Kinds that fall back to a raw property map when strict decoding fails.
pub const LOOSE_FALLBACK_KINDS: [&str; 3] =
    [kinds::ATTACK_PATTERN, kinds::CAMPAIGN, kinds::INTRUSION_SET];

/// External reference source naming canonical MITRE ATT&CK ids.
pub const MITRE_SOURCE_NAME: &str = "mitre-attack";

/// STIX 2.1 object types accepted by strict decoding. Anything else,
/// including `x-` custom types, is unrecognized.
const STANDARD_TYPES: &[&str] = &[
    // domain objects
    "attack-pattern",
    "campaign",
    "course-of-action",
    "grouping",
    "identity",
    "incident",
    "indicator",
    "infrastructure",
    "intrusion-set",
    "location",
    "malware",
    "malware-analysis",
    "note",
    "observed-data",
    "opinion",
    "report",
    "threat-actor",
    "tool",
    "vulnerability",
    // relationship objects
    "relationship",
    "sighting",
    // meta objects
    "marking-definition",
    "language-content",
    "extension-definition",
    // cyber-observable objects
    "artifact",
    "autonomous-system",
    "directory",
    "domain-name",
    "email-addr",
    "email-message",
    "file",
    "ipv4-addr",
    "ipv6-addr",
    "mac-addr",
    "mutex",
    "network-traffic",
    "process",
    "software",
    "url",
    "user-account",
    "windows-registry-key",
    "x509-certificate",
];

/// Whether `kind` is part of the STIX 2.1 type vocabulary.
pub fn is_standard_type(kind: &str) -> bool {
    STANDARD_TYPES.contains(&kind)
}

// ---------------------------------------------------------------------------
// ObjectParseError
// ---------------------------------------------------------------------------

/// Why a single object could not be decoded. Recoverable: the object is
/// skipped and counted, the enclosing load continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectParseError {
    /// The entry is not a JSON object.
    #[error("entry is not a JSON object")]
    NotAnObject,

    /// The `type` property is missing or not a string.
    #[error("missing or non-string `type`")]
    MissingType,

    /// The `id` property is missing or not a string.
    #[error("{kind}: missing or non-string `id`")]
    MissingId { kind: String },

    /// The type is outside the recognized vocabulary.
    #[error("unrecognized type `{0}`")]
    UnrecognizedType(String),

    /// The type is known but its properties do not fit the typed model.
    #[error("{kind}: {reason}")]
    Invalid { kind: String, reason: String },
}

// ---------------------------------------------------------------------------
// ExternalReference
// ---------------------------------------------------------------------------

/// An entry of `external_references`, mapping a graph id to an external
/// canonical identifier such as a technique code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub source_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    /// `url`, `description`, hashes and anything else.
    #[serde(flatten)]
    pub extra: RawObject,
}

/// A `kill_chain_phases` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillChainPhase {
    pub kill_chain_name: String,
    pub phase_name: String,
    #[serde(flatten)]
    pub extra: RawObject,
}

// ---------------------------------------------------------------------------
// Typed objects
// ---------------------------------------------------------------------------

/// An adversary group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntrusionSet {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub external_references: Option<Vec<ExternalReference>>,
    #[serde(skip)]
    raw: RawObject,
}

/// An adversary technique.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttackPattern {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kill_chain_phases: Option<Vec<KillChainPhase>>,
    #[serde(default)]
    pub x_mitre_platforms: Option<Vec<String>>,
    #[serde(default)]
    pub external_references: Option<Vec<ExternalReference>>,
    #[serde(skip)]
    raw: RawObject,
}

/// A named set of adversary activity over time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Campaign {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub external_references: Option<Vec<ExternalReference>>,
    #[serde(skip)]
    raw: RawObject,
}

/// A directed, typed edge between two objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub relationship_type: String,
    pub source_ref: String,
    pub target_ref: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub external_references: Option<Vec<ExternalReference>>,
    #[serde(skip)]
    raw: RawObject,
}

/// Any other standard STIX object. Only `type` and `id` are modeled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenericObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(skip)]
    raw: RawObject,
}

/// The raw property map of an allow-listed kind that failed strict decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LooseObject(pub RawObject);

impl LooseObject {
    /// Wrap a raw map if its `type` is one of [`LOOSE_FALLBACK_KINDS`].
    pub fn from_raw(raw: RawObject) -> Option<Self> {
        let allowed = matches!(
            raw.get("type").and_then(Value::as_str),
            Some(kind) if LOOSE_FALLBACK_KINDS.contains(&kind)
        );
        allowed.then_some(Self(raw))
    }

    fn str_prop(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// StixObject
// ---------------------------------------------------------------------------

/// A decoded graph node.
///
/// Callers read it through [`StixCommon`] and never need to know whether it
/// was decoded strictly or kept as a loose map. Serializes as the property
/// map it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub enum StixObject {
    IntrusionSet(IntrusionSet),
    AttackPattern(AttackPattern),
    Campaign(Campaign),
    Relationship(Relationship),
    Other(GenericObject),
    Loose(LooseObject),
}

/// Borrowed view of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipRef<'a> {
    pub id: &'a str,
    pub relationship_type: &'a str,
    pub source_ref: &'a str,
    pub target_ref: &'a str,
}

impl StixObject {
    /// Strictly decode a raw JSON value into its typed variant.
    ///
    /// Never produces [`StixObject::Loose`]; the fallback policy belongs to
    /// the caller.
    pub fn decode_strict(value: Value) -> Result<Self, ObjectParseError> {
        let Value::Object(raw) = value else {
            return Err(ObjectParseError::NotAnObject);
        };
        Self::decode_strict_map(raw)
    }

    /// Strictly decode an already-unwrapped property map.
    pub fn decode_strict_map(raw: RawObject) -> Result<Self, ObjectParseError> {
        let kind = match raw.get("type") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(ObjectParseError::MissingType),
        };
        if !is_standard_type(&kind) {
            return Err(ObjectParseError::UnrecognizedType(kind));
        }
        if !matches!(raw.get("id"), Some(Value::String(_))) {
            return Err(ObjectParseError::MissingId { kind });
        }

        let value = Value::Object(raw.clone());
        let decoded = match kind.as_str() {
            kinds::INTRUSION_SET => serde_json::from_value::<IntrusionSet>(value)
                .map(|o| Self::IntrusionSet(IntrusionSet { raw, ..o })),
            kinds::ATTACK_PATTERN => serde_json::from_value::<AttackPattern>(value)
                .map(|o| Self::AttackPattern(AttackPattern { raw, ..o })),
            kinds::CAMPAIGN => serde_json::from_value::<Campaign>(value)
                .map(|o| Self::Campaign(Campaign { raw, ..o })),
            kinds::RELATIONSHIP => serde_json::from_value::<Relationship>(value)
                .map(|o| Self::Relationship(Relationship { raw, ..o })),
            _ => serde_json::from_value::<GenericObject>(value)
                .map(|o| Self::Other(GenericObject { raw, ..o })),
        };

        decoded.map_err(|e| ObjectParseError::Invalid {
            kind,
            reason: e.to_string(),
        })
    }

    /// The property map this object was decoded from.
    pub fn raw(&self) -> &RawObject {
        match self {
            Self::IntrusionSet(o) => &o.raw,
            Self::AttackPattern(o) => &o.raw,
            Self::Campaign(o) => &o.raw,
            Self::Relationship(o) => &o.raw,
            Self::Other(o) => &o.raw,
            Self::Loose(o) => &o.0,
        }
    }

    /// Whether this object represents an adversary group.
    pub fn is_intrusion_set(&self) -> bool {
        self.object_type() == kinds::INTRUSION_SET
    }

    /// Edge view, for typed relationships.
    pub fn as_relationship(&self) -> Option<RelationshipRef<'_>> {
        match self {
            Self::Relationship(r) => Some(RelationshipRef {
                id: &r.id,
                relationship_type: &r.relationship_type,
                source_ref: &r.source_ref,
                target_ref: &r.target_ref,
            }),
            _ => None,
        }
    }

    /// Whether the object was kept as a raw map after strict decoding failed.
    pub fn is_loose(&self) -> bool {
        matches!(self, Self::Loose(_))
    }
}

impl Serialize for StixObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

/// Common accessors shared by every object representation.
pub trait StixCommon {
    /// Object id, or `""` when absent.
    fn id(&self) -> &str;
    /// Type discriminator, or `""` when absent.
    fn object_type(&self) -> &str;
    fn name(&self) -> Option<&str>;
    fn description(&self) -> Option<&str>;
    /// External references; entries that do not fit the model are skipped.
    fn external_references(&self) -> Vec<ExternalReference>;

    /// Canonical MITRE ATT&CK id (e.g. `G0007`, `T1059`), if referenced.
    fn mitre_id(&self) -> Option<String> {
        self.external_references()
            .into_iter()
            .find(|r| r.source_name == MITRE_SOURCE_NAME)
            .and_then(|r| r.external_id)
    }
}

fn refs_from_raw(raw: &RawObject) -> Vec<ExternalReference> {
    match raw.get("external_references") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

impl StixCommon for StixObject {
    fn id(&self) -> &str {
        match self {
            Self::IntrusionSet(o) => &o.id,
            Self::AttackPattern(o) => &o.id,
            Self::Campaign(o) => &o.id,
            Self::Relationship(o) => &o.id,
            Self::Other(o) => &o.id,
            Self::Loose(o) => o.str_prop("id").unwrap_or_default(),
        }
    }

    fn object_type(&self) -> &str {
        match self {
            Self::IntrusionSet(o) => &o.kind,
            Self::AttackPattern(o) => &o.kind,
            Self::Campaign(o) => &o.kind,
            Self::Relationship(o) => &o.kind,
            Self::Other(o) => &o.kind,
            Self::Loose(o) => o.str_prop("type").unwrap_or_default(),
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::IntrusionSet(o) => Some(&o.name),
            Self::AttackPattern(o) => Some(&o.name),
            Self::Campaign(o) => Some(&o.name),
            Self::Relationship(_) => None,
            Self::Other(o) => o.raw.get("name").and_then(Value::as_str),
            Self::Loose(o) => o.str_prop("name"),
        }
    }

    fn description(&self) -> Option<&str> {
        match self {
            Self::IntrusionSet(o) => o.description.as_deref(),
            Self::AttackPattern(o) => o.description.as_deref(),
            Self::Campaign(o) => o.description.as_deref(),
            Self::Relationship(o) => o.description.as_deref(),
            Self::Other(o) => o.raw.get("description").and_then(Value::as_str),
            Self::Loose(o) => o.str_prop("description"),
        }
    }

    fn external_references(&self) -> Vec<ExternalReference> {
        match self {
            Self::IntrusionSet(o) => o.external_references.clone().unwrap_or_default(),
            Self::AttackPattern(o) => o.external_references.clone().unwrap_or_default(),
            Self::Campaign(o) => o.external_references.clone().unwrap_or_default(),
            Self::Relationship(o) => o.external_references.clone().unwrap_or_default(),
            Self::Other(o) => refs_from_raw(&o.raw),
            Self::Loose(o) => refs_from_raw(&o.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// A write-once container of STIX objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub objects: Vec<T>,
}

impl<T> Bundle<T> {
    /// Wrap objects in a bundle with a fresh id.
    pub fn new(objects: Vec<T>) -> Self {
        Self {
            kind: kinds::BUNDLE.into(),
            id: new_bundle_id(),
            objects,
        }
    }
}

/// Generate a fresh `bundle--<uuid>` identifier.
pub fn new_bundle_id() -> String {
    format!("{}--{}", kinds::BUNDLE, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_decodes_typed_intrusion_set() {
        let obj = StixObject::decode_strict(json!({
            "type": "intrusion-set",
            "id": "intrusion-set--1",
            "name": "APT28",
            "aliases": ["Fancy Bear"],
            "external_references": [
                {"source_name": "mitre-attack", "external_id": "G0007", "url": "https://attack.mitre.org/groups/G0007"}
            ],
            "x_mitre_version": "4.0"
        }))
        .unwrap();

        assert!(matches!(obj, StixObject::IntrusionSet(_)));
        assert!(obj.is_intrusion_set());
        assert_eq!(obj.id(), "intrusion-set--1");
        assert_eq!(obj.name(), Some("APT28"));
        assert_eq!(obj.mitre_id().as_deref(), Some("G0007"));
    }

    #[test]
    fn strict_preserves_custom_properties() {
        let input = json!({
            "type": "attack-pattern",
            "id": "attack-pattern--1",
            "name": "Command and Scripting Interpreter",
            "x_mitre_platforms": ["Linux", "Windows"],
            "x_mitre_is_subtechnique": false,
            "kill_chain_phases": [{"kill_chain_name": "mitre-attack", "phase_name": "execution"}]
        });
        let obj = StixObject::decode_strict(input).unwrap();
        let out = serde_json::to_value(&obj).unwrap();

        assert_eq!(out["x_mitre_is_subtechnique"], json!(false));
        assert_eq!(out["x_mitre_platforms"], json!(["Linux", "Windows"]));
        assert_eq!(out["kill_chain_phases"][0]["phase_name"], "execution");
        assert_eq!(out["type"], "attack-pattern");
    }

    #[test]
    fn reserializes_exactly_as_decoded() {
        let inputs = [
            r#"{"id":"attack-pattern--1","type":"attack-pattern","created":"2020-01-01T00:00:00Z","name":"T","description":null,"kill_chain_phases":[{"kill_chain_name":"mitre-attack","phase_name":"execution","x_custom_phase":"p1"}],"external_references":[{"source_name":"mitre-attack","external_id":null,"url":"https://attack.mitre.org"}]}"#,
            r#"{"id":"IS-1","type":"intrusion-set","created":"2020-01-01T00:00:00Z","name":"G1","aliases":null}"#,
            r#"{"name":"C1","type":"campaign","id":"C-1","first_seen":null,"x_nested":{"b":1,"a":[null,2]}}"#,
            r#"{"target_ref":"AP-1","type":"relationship","id":"R1","source_ref":"IS-1","relationship_type":"uses","description":null}"#,
            r#"{"is_family":true,"id":"malware--1","type":"malware","name":null}"#,
        ];

        for text in inputs {
            let obj = StixObject::decode_strict(serde_json::from_str(text).unwrap()).unwrap();
            assert!(!obj.is_loose(), "{text}");
            assert_eq!(serde_json::to_string(&obj).unwrap(), text);
        }
    }

    #[test]
    fn typed_view_reads_through_nulls_and_extras() {
        let obj = StixObject::decode_strict(json!({
            "type": "attack-pattern",
            "id": "AP-1",
            "name": "T",
            "description": null,
            "kill_chain_phases": [
                {"kill_chain_name": "mitre-attack", "phase_name": "execution", "x_custom_phase": "p1"}
            ]
        }))
        .unwrap();

        let StixObject::AttackPattern(pattern) = &obj else {
            panic!("expected an attack pattern, got {obj:?}");
        };
        assert_eq!(pattern.description, None);
        let phases = pattern.kill_chain_phases.as_ref().unwrap();
        assert_eq!(phases[0].phase_name, "execution");
        assert_eq!(phases[0].extra["x_custom_phase"], "p1");
        assert_eq!(obj.raw()["description"], Value::Null);
    }

    #[test]
    fn strict_rejects_missing_required_field() {
        let err = StixObject::decode_strict(json!({
            "type": "attack-pattern",
            "id": "AP-1"
        }))
        .unwrap_err();
        assert!(matches!(err, ObjectParseError::Invalid { ref kind, .. } if kind == "attack-pattern"));
    }

    #[test]
    fn strict_rejects_unrecognized_and_malformed_types() {
        assert_eq!(
            StixObject::decode_strict(json!({"type": "x-mitre-tactic", "id": "x-mitre-tactic--1"})),
            Err(ObjectParseError::UnrecognizedType("x-mitre-tactic".into()))
        );
        assert_eq!(
            StixObject::decode_strict(json!({"type": 7, "id": "a"})),
            Err(ObjectParseError::MissingType)
        );
        assert_eq!(
            StixObject::decode_strict(json!("not an object")),
            Err(ObjectParseError::NotAnObject)
        );
        assert_eq!(
            StixObject::decode_strict(json!({"type": "malware"})),
            Err(ObjectParseError::MissingId { kind: "malware".into() })
        );
    }

    #[test]
    fn generic_object_keeps_properties() {
        let obj = StixObject::decode_strict(json!({
            "type": "malware",
            "id": "malware--1",
            "name": "X-Agent",
            "is_family": true
        }))
        .unwrap();
        assert!(matches!(obj, StixObject::Other(_)));
        assert_eq!(obj.name(), Some("X-Agent"));
        assert_eq!(serde_json::to_value(&obj).unwrap()["is_family"], json!(true));
    }

    #[test]
    fn relationship_view() {
        let obj = StixObject::decode_strict(json!({
            "type": "relationship",
            "id": "R1",
            "relationship_type": "uses",
            "source_ref": "IS-1",
            "target_ref": "AP-1"
        }))
        .unwrap();
        let rel = obj.as_relationship().unwrap();
        assert_eq!(rel.source_ref, "IS-1");
        assert_eq!(rel.target_ref, "AP-1");
        assert_eq!(rel.relationship_type, "uses");
        assert_eq!(obj.name(), None);
    }

    #[test]
    fn loose_object_accessors_use_defaults() {
        let Value::Object(raw) = json!({
            "type": "intrusion-set",
            "description": "no name here",
            "external_references": [
                {"source_name": "mitre-attack", "external_id": "G0001"},
                "garbage"
            ]
        }) else {
            unreachable!()
        };
        let obj = StixObject::Loose(LooseObject::from_raw(raw).unwrap());

        assert_eq!(obj.id(), "");
        assert_eq!(obj.object_type(), "intrusion-set");
        assert!(obj.is_intrusion_set());
        assert_eq!(obj.name(), None);
        assert_eq!(obj.description(), Some("no name here"));
        assert_eq!(obj.external_references().len(), 1);
        assert_eq!(obj.mitre_id().as_deref(), Some("G0001"));
    }

    #[test]
    fn loose_fallback_is_allow_listed() {
        let Value::Object(raw) = json!({"type": "malware", "id": "malware--1"}) else {
            unreachable!()
        };
        assert!(LooseObject::from_raw(raw).is_none());
    }

    #[test]
    fn bundle_serializes_type_id_objects_in_order() {
        let bundle = Bundle::new(vec![json!({"type": "identity", "id": "identity--1"})]);
        assert!(bundle.id.starts_with("bundle--"));

        let text = serde_json::to_string(&bundle).unwrap();
        let type_pos = text.find("\"type\"").unwrap();
        let id_pos = text.find("\"id\"").unwrap();
        let objects_pos = text.find("\"objects\"").unwrap();
        assert!(type_pos < id_pos && id_pos < objects_pos);
    }

    #[test]
    fn bundle_ids_are_fresh() {
        assert_ne!(new_bundle_id(), new_bundle_id());
    }
}
