//! The object database: classes, patterns, per-class object variants, and
//! the propagation OBBs used to seed neighbor positions. Loaded from and
//! saved to the bit-stable JSON format described in the external
//! interfaces section — solver correctness depends on the invariants this
//! module maintains (every pattern's derived `class_id -> pattern_id`
//! index matches the pattern table; dangling class references are
//! tolerated but never followed).

use crate::id::{ClassId, IdAllocator, PatternId};
use crate::pattern::{Pattern, PatternMap};
use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

// ─── OBB ────────────────────────────────────────────────────────────────

/// An oriented bounding box: used both to seed candidate neighbor
/// positions (sample a point inside, transform into world space) and, by
/// a host editor, to draw a gizmo. This crate never draws anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub rotation: Mat3,
}

impl Obb {
    pub fn new(center: Vec3, half_extents: Vec3, rotation: Mat3) -> Self {
        Self {
            center,
            half_extents,
            rotation,
        }
    }

    /// Affine transform mapping the unit OBB frame into world space.
    pub fn transform(&self) -> Mat4 {
        Mat4::from_translation(self.center) * Mat4::from_mat3(self.rotation)
    }

    fn from_wire(wire: &ObbWire) -> Self {
        let m = Mat4::from_cols_array(&wire.transform);
        let center = m.w_axis.truncate();
        let rotation = Mat3::from_mat4(m);
        let half_extents = Vec3::from(wire.half_extents);
        Self::new(center, half_extents, rotation)
    }

    fn to_wire(self) -> ObbWire {
        let m = self.transform();
        ObbWire {
            transform: m.to_cols_array(),
            half_extents: self.half_extents.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObbWire {
    transform: [f32; 16],
    half_extents: [f32; 3],
}

// ─── Object data ────────────────────────────────────────────────────────

/// Per-axis orientation policy applied when finalizing a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Free = 0,
    Lock = 1,
    Stepped = 2,
}

// `serde_repr` is not in the dependency graph, so the int <-> enum mapping
// for the wire format's `{"v": [0|1|2, ...]}` shape is written by hand.
impl Orientation {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Orientation::Lock,
            2 => Orientation::Stepped,
            _ => Orientation::Free,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSettings {
    pub x: Orientation,
    pub y: Orientation,
    pub z: Orientation,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            x: Orientation::Free,
            y: Orientation::Free,
            z: Orientation::Free,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AxisSettingsWire {
    v: [u8; 3],
}

impl From<AxisSettings> for AxisSettingsWire {
    fn from(a: AxisSettings) -> Self {
        Self {
            v: [a.x.as_u8(), a.y.as_u8(), a.z.as_u8()],
        }
    }
}

impl From<AxisSettingsWire> for AxisSettings {
    fn from(w: AxisSettingsWire) -> Self {
        Self {
            x: Orientation::from_u8(w.v[0]),
            y: Orientation::from_u8(w.v[1]),
            z: Orientation::from_u8(w.v[2]),
        }
    }
}

/// One concrete variant of a class: an asset, its extent, and the OBBs
/// used to propagate new neighbors around it. A class may have many.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    pub name: String,
    pub asset_path: String,
    pub properties: HashMap<String, f32>,
    pub propagation_obbs: Vec<Obb>,
    pub extent: f32,
    pub axis_settings: AxisSettings,
}

impl ObjectData {
    pub fn new(name: impl Into<String>, asset_path: impl Into<String>, extent: f32) -> Self {
        Self {
            name: name.into(),
            asset_path: asset_path.into(),
            properties: HashMap::new(),
            propagation_obbs: Vec::new(),
            extent,
            axis_settings: AxisSettings::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.extent > 0.0 && !self.name.is_empty() && !self.asset_path.is_empty()
    }

    pub fn try_get_property(&self, name: &str, default: f32) -> f32 {
        self.properties.get(name).copied().unwrap_or(default)
    }

    fn from_wire(wire: ObjectDataWire) -> Self {
        Self {
            name: wire.name,
            asset_path: wire.asset_path,
            properties: wire.properties,
            propagation_obbs: wire.propagation_patterns.iter().map(Obb::from_wire).collect(),
            extent: wire.extent,
            axis_settings: wire.axis_settings.into(),
        }
    }

    fn to_wire(&self) -> ObjectDataWire {
        ObjectDataWire {
            name: self.name.clone(),
            asset_path: self.asset_path.clone(),
            properties: self.properties.clone(),
            propagation_patterns: self.propagation_obbs.iter().map(|o| o.to_wire()).collect(),
            extent: self.extent,
            axis_settings: self.axis_settings.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectDataWire {
    name: String,
    asset_path: String,
    #[serde(default)]
    properties: HashMap<String, f32>,
    #[serde(default)]
    propagation_patterns: Vec<ObbWire>,
    #[serde(default = "default_extent")]
    extent: f32,
    #[serde(default)]
    axis_settings: AxisSettingsWire,
}

fn default_extent() -> f32 {
    1.0
}

impl Default for AxisSettingsWire {
    fn default() -> Self {
        AxisSettings::default().into()
    }
}

// ─── Wire format for patterns ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatternWire {
    #[serde(default)]
    pattern_type: Option<i64>,
    #[serde(default)]
    required_types: Vec<i64>,
    #[serde(default = "default_weight")]
    weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseWire {
    #[serde(default)]
    object_classes: HashMap<String, i64>,
    #[serde(default)]
    object_data: HashMap<String, Vec<ObjectDataWire>>,
    #[serde(default)]
    patterns: HashMap<String, PatternWire>,
}

// ─── Errors ─────────────────────────────────────────────────────────────

/// Failure modes for `ObjectDatabase::load`/`save`. The one place this
/// crate surfaces a `Result` to a caller — everything past construction
/// runs to completion per the solver's own failure semantics.
#[derive(Debug)]
pub enum DatabaseError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// Two patterns in the source JSON shared the same numeric key.
    Duplicate { pattern_id: i64 },
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::Io(e) => write!(f, "database I/O error: {e}"),
            DatabaseError::Parse(e) => write!(f, "database JSON error: {e}"),
            DatabaseError::Duplicate { pattern_id } => {
                write!(f, "duplicate pattern id {pattern_id} in database")
            }
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatabaseError::Io(e) => Some(e),
            DatabaseError::Parse(e) => Some(e),
            DatabaseError::Duplicate { .. } => None,
        }
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(e: std::io::Error) -> Self {
        DatabaseError::Io(e)
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        DatabaseError::Parse(e)
    }
}

// ─── Database ───────────────────────────────────────────────────────────

/// Classes, patterns, object variants, and the derived
/// `class_id -> pattern_id` index that solver validity checks rely on.
#[derive(Debug, Clone, Default)]
pub struct ObjectDatabase {
    class_names: HashMap<ClassId, String>,
    object_data: HashMap<ClassId, Vec<ObjectData>>,
    patterns: HashMap<PatternId, Pattern>,
    patterns_for_class: HashMap<ClassId, Vec<PatternId>>,
    class_alloc: IdAllocator,
    pattern_alloc: IdAllocator,
}

impl ObjectDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Classes ──────────────────────────────────────────────────────

    pub fn create_class(&mut self, name: impl Into<String>) -> ClassId {
        let id = ClassId::new(self.class_alloc.alloc());
        self.class_names.insert(id, name.into());
        id
    }

    pub fn rename_class(&mut self, id: ClassId, name: impl Into<String>) {
        self.class_names.insert(id, name.into());
    }

    /// Deletes the class's name and object-data variants. Patterns that
    /// reference it are left untouched — they become "unreachable" per the
    /// database invariants and keep functioning for constraint purposes,
    /// rendered as "Unknown" by any display code.
    pub fn delete_class(&mut self, id: ClassId) {
        self.class_names.remove(&id);
        self.object_data.remove(&id);
    }

    pub fn class_name(&self, id: ClassId) -> &str {
        self.class_names.get(&id).map(String::as_str).unwrap_or("Unknown")
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &str)> {
        self.class_names.iter().map(|(&id, name)| (id, name.as_str()))
    }

    // ── Patterns ─────────────────────────────────────────────────────

    pub fn create_pattern(&mut self, pattern: Pattern) -> PatternId {
        let id = PatternId::new(self.pattern_alloc.alloc());
        self.insert_pattern(id, pattern);
        id
    }

    pub fn delete_pattern(&mut self, id: PatternId) -> Option<Pattern> {
        let removed = self.patterns.remove(&id)?;
        self.remove_from_index(id, removed.class_id);
        Some(removed)
    }

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.get(&id)
    }

    pub fn pattern_mut(&mut self, id: PatternId) -> Option<&mut Pattern> {
        self.patterns.get_mut(&id)
    }

    /// Reassign a pattern's `class_id`. Atomic: the derived index is
    /// always consistent with the pattern table, even mid-call.
    pub fn set_pattern_class(&mut self, id: PatternId, new_class: ClassId) {
        let Some(pattern) = self.patterns.get_mut(&id) else {
            return;
        };
        let old_class = pattern.class_id;
        if old_class == new_class {
            return;
        }
        pattern.class_id = new_class;
        self.remove_from_index(id, old_class);
        self.patterns_for_class.entry(new_class).or_default().push(id);
    }

    pub fn add_requirement(&mut self, id: PatternId, required: ClassId) {
        if let Some(p) = self.patterns.get_mut(&id) {
            p.required_classes.push(required);
        }
    }

    pub fn remove_requirement(&mut self, id: PatternId, required: ClassId) {
        if let Some(p) = self.patterns.get_mut(&id) {
            if let Some(pos) = p.required_classes.iter().position(|&c| c == required) {
                p.required_classes.remove(pos);
            }
        }
    }

    pub fn set_pattern_weight(&mut self, id: PatternId, weight: f32) {
        if let Some(p) = self.patterns.get_mut(&id) {
            p.weight = weight;
        }
    }

    pub fn patterns(&self) -> impl Iterator<Item = (PatternId, &Pattern)> {
        self.patterns.iter().map(|(&id, p)| (id, p))
    }

    pub fn patterns_for_class(&self, class_id: ClassId) -> &[PatternId] {
        self.patterns_for_class
            .get(&class_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `pattern_id -> Pattern`, handed to a fresh `WFCSolver`.
    pub fn make_pattern_map(&self) -> PatternMap {
        self.patterns.clone()
    }

    fn insert_pattern(&mut self, id: PatternId, pattern: Pattern) {
        let class_id = pattern.class_id;
        self.patterns.insert(id, pattern);
        self.patterns_for_class.entry(class_id).or_default().push(id);
    }

    fn remove_from_index(&mut self, id: PatternId, class_id: ClassId) {
        if let Some(list) = self.patterns_for_class.get_mut(&class_id) {
            list.retain(|&p| p != id);
            if list.is_empty() {
                self.patterns_for_class.remove(&class_id);
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.patterns_for_class.clear();
        for (&id, pattern) in &self.patterns {
            self.patterns_for_class
                .entry(pattern.class_id)
                .or_default()
                .push(id);
        }
    }

    // ── Object data ──────────────────────────────────────────────────

    pub fn add_object_data(&mut self, class_id: ClassId, data: ObjectData) {
        self.object_data.entry(class_id).or_default().push(data);
    }

    pub fn remove_object_data(&mut self, class_id: ClassId, index: usize) -> Option<ObjectData> {
        let variants = self.object_data.get_mut(&class_id)?;
        if index >= variants.len() {
            return None;
        }
        Some(variants.remove(index))
    }

    pub fn objects_for_class(&self, class_id: ClassId) -> &[ObjectData] {
        self.object_data.get(&class_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn objects_for_class_mut(&mut self, class_id: ClassId) -> &mut Vec<ObjectData> {
        self.object_data.entry(class_id).or_default()
    }

    // ── Serialization ─────────────────────────────────────────────────

    pub fn load_str(json: &str) -> Result<Self, DatabaseError> {
        let wire: DatabaseWire = serde_json::from_str(json)?;
        Self::from_wire(wire)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let text = std::fs::read_to_string(path)?;
        Self::load_str(&text)
    }

    pub fn save_str(&self) -> Result<String, DatabaseError> {
        Ok(serde_json::to_string(&self.to_wire())?)
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        std::fs::write(path, self.save_str()?)?;
        Ok(())
    }

    fn from_wire(wire: DatabaseWire) -> Result<Self, DatabaseError> {
        let mut db = Self::new();

        let mut name_to_id: HashMap<&str, ClassId> = HashMap::new();
        let mut max_class_id = -1i64;
        for (name, id) in &wire.object_classes {
            let class_id = ClassId::new(*id);
            db.class_names.insert(class_id, name.clone());
            name_to_id.insert(name.as_str(), class_id);
            max_class_id = max_class_id.max(*id);
        }

        for (class_name, variants) in wire.object_data {
            // Object data for a class absent from `object_classes` has no
            // way to name its class id in this format — it is dropped,
            // logged for visibility, matching the "resource-missing is
            // non-fatal" error philosophy.
            let Some(&class_id) = name_to_id.get(class_name.as_str()) else {
                log::debug!("dropping object_data for unknown class \"{class_name}\"");
                continue;
            };
            for wire_obj in variants {
                db.object_data
                    .entry(class_id)
                    .or_default()
                    .push(ObjectData::from_wire(wire_obj));
            }
        }

        let mut max_pattern_id = -1i64;
        let mut seen_ids = std::collections::HashSet::new();
        for (key, wire_pattern) in wire.patterns {
            let Ok(pattern_id_raw) = key.parse::<i64>() else {
                log::warn!("dropping pattern with non-numeric id \"{key}\"");
                continue;
            };
            if !seen_ids.insert(pattern_id_raw) {
                return Err(DatabaseError::Duplicate {
                    pattern_id: pattern_id_raw,
                });
            }
            let Some(pattern_type) = wire_pattern.pattern_type else {
                log::warn!("dropping pattern {pattern_id_raw} with missing pattern_type");
                continue;
            };
            max_pattern_id = max_pattern_id.max(pattern_id_raw);

            let pattern = Pattern::new(
                ClassId::new(pattern_type),
                wire_pattern.required_types.into_iter().map(ClassId::new).collect(),
                wire_pattern.weight,
            );
            db.patterns.insert(PatternId::new(pattern_id_raw), pattern);
        }

        db.rebuild_index();
        db.class_alloc = IdAllocator::resume_after(max_class_id);
        db.pattern_alloc = IdAllocator::resume_after(max_pattern_id);

        Ok(db)
    }

    fn to_wire(&self) -> DatabaseWire {
        let object_classes = self
            .class_names
            .iter()
            .map(|(&id, name)| (name.clone(), id.0))
            .collect();

        let mut object_data: HashMap<String, Vec<ObjectDataWire>> = HashMap::new();
        for (&class_id, variants) in &self.object_data {
            let Some(name) = self.class_names.get(&class_id) else {
                continue; // unnamed classes have no key in this wire format
            };
            object_data.insert(
                name.clone(),
                variants.iter().map(ObjectData::to_wire).collect(),
            );
        }

        let patterns = self
            .patterns
            .iter()
            .map(|(id, pattern)| {
                (
                    id.0.to_string(),
                    PatternWire {
                        pattern_type: Some(pattern.class_id.0),
                        required_types: pattern.required_classes.iter().map(|c| c.0).collect(),
                        weight: pattern.weight,
                    },
                )
            })
            .collect();

        DatabaseWire {
            object_classes,
            object_data,
            patterns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_classes_patterns_and_objects() {
        let mut db = ObjectDatabase::new();
        let tree = db.create_class("Tree");
        assert_eq!(tree, ClassId::new(0));

        let pattern_id = db.create_pattern(Pattern::new(tree, vec![tree], 2.5));

        let mut obj = ObjectData::new("pine", "a.obj", 1.0);
        obj.axis_settings = AxisSettings {
            x: Orientation::Free,
            y: Orientation::Stepped,
            z: Orientation::Lock,
        };
        db.add_object_data(tree, obj.clone());

        let json = db.save_str().unwrap();
        let loaded = ObjectDatabase::load_str(&json).unwrap();

        assert_eq!(loaded.class_name(tree), "Tree");
        let pattern = loaded.pattern(pattern_id).unwrap();
        assert_eq!(pattern.class_id, tree);
        assert_eq!(pattern.required_classes, vec![tree]);
        assert_eq!(pattern.weight, 2.5);

        let variants = loaded.objects_for_class(tree);
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].asset_path, "a.obj");
        assert_eq!(variants[0].axis_settings.y, Orientation::Stepped);
        assert_eq!(variants[0].axis_settings.z, Orientation::Lock);
    }

    #[test]
    fn dangling_class_reference_is_tolerated() {
        let mut db = ObjectDatabase::new();
        // A pattern referencing a class id that was never created.
        let ghost = ClassId::new(999);
        db.create_pattern(Pattern::new(ghost, vec![], 1.0));
        assert_eq!(db.class_name(ghost), "Unknown");
        assert_eq!(db.patterns_for_class(ghost).len(), 1);
    }

    #[test]
    fn single_pattern_entry_loads_fine() {
        let json = r#"{
            "object_classes": {},
            "object_data": {},
            "patterns": { "7": {"pattern_type": 1, "required_types": [], "weight": 1.0} }
        }"#;
        assert!(ObjectDatabase::load_str(json).is_ok());
    }

    #[test]
    fn duplicate_pattern_id_fails_load() {
        // "7" and "07" are distinct JSON keys that parse to the same i64,
        // so this is the only way two `patterns` entries collide.
        let json = r#"{
            "object_classes": {},
            "object_data": {},
            "patterns": {
                "7": {"pattern_type": 1, "required_types": [], "weight": 1.0},
                "07": {"pattern_type": 2, "required_types": [], "weight": 1.0}
            }
        }"#;
        let err = ObjectDatabase::load_str(json).unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { pattern_id: 7 }));
    }

    #[test]
    fn pattern_with_missing_pattern_type_is_dropped_not_fatal() {
        let json = r#"{
            "object_classes": {},
            "object_data": {},
            "patterns": {
                "1": {"required_types": [], "weight": 1.0},
                "2": {"pattern_type": 5, "required_types": [], "weight": 1.0}
            }
        }"#;
        let db = ObjectDatabase::load_str(json).unwrap();
        assert!(db.pattern(PatternId::new(1)).is_none());
        assert!(db.pattern(PatternId::new(2)).is_some());
    }

    #[test]
    fn object_data_for_unknown_class_is_dropped_not_fatal() {
        let json = r#"{
            "object_classes": {"Tree": 1},
            "object_data": {"Rock": [{"name": "r", "asset_path": "r.obj", "extent": 1.0}]},
            "patterns": {}
        }"#;
        let db = ObjectDatabase::load_str(json).unwrap();
        assert_eq!(db.objects_for_class(ClassId::new(1)).len(), 0);
    }

    #[test]
    fn editing_pattern_class_is_atomic_in_index() {
        let mut db = ObjectDatabase::new();
        let a = db.create_class("A");
        let b = db.create_class("B");
        let pid = db.create_pattern(Pattern::new(a, vec![], 1.0));
        assert_eq!(db.patterns_for_class(a), &[pid]);
        db.set_pattern_class(pid, b);
        assert!(db.patterns_for_class(a).is_empty());
        assert_eq!(db.patterns_for_class(b), &[pid]);
    }
}
