//! Data model for block instances and their host-side objects.
//!
//! A `BlockDefinition` is the shared template; a `BlockInstance` places it
//! with its own position, scale, attached text fields and (for dynamic
//! blocks) a collection of typed parameters. Geometry inside a definition is
//! stored as `Entity` values owned by the definition in the document.

use crate::id::ObjectId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;
use std::ops::{Add, Sub};

/// Average glyph advance as a fraction of text height, used for text extents.
const TEXT_WIDTH_FACTOR: f64 = 0.6;

// ─── Geometry ────────────────────────────────────────────────────────────

/// A point (or displacement) in drawing coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Linear interpolation toward `other` (`t` in `[0, 1]`).
    pub fn lerp(self, other: Point3, t: f64) -> Point3 {
        Point3::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Non-uniform scale factors of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Scale3 {
    pub const fn uniform(factor: f64) -> Self {
        Self {
            x: factor,
            y: factor,
            z: factor,
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.x == self.y && self.y == self.z
    }

    pub fn lerp(self, other: Scale3, t: f64) -> Scale3 {
        Scale3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }
}

impl Default for Scale3 {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

/// Axis-aligned bounding region (min/max corner pair).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    pub min: Point3,
    pub max: Point3,
}

impl Extents {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Smallest extents containing every point. `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Point3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut ext = Extents::new(first, first);
        for p in iter {
            ext.extend_point(p);
        }
        Some(ext)
    }

    pub fn extend_point(&mut self, p: Point3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    #[must_use]
    pub fn union(&self, other: &Extents) -> Extents {
        let mut out = *self;
        out.extend_point(other.min);
        out.extend_point(other.max);
        out
    }

    #[must_use]
    pub fn translate(&self, delta: Point3) -> Extents {
        Extents::new(self.min + delta, self.max + delta)
    }

    /// The four plan-view corners at `min.z`, counter-clockwise from `min`.
    pub fn corners(&self) -> [Point3; 4] {
        let z = self.min.z;
        [
            Point3::new(self.min.x, self.min.y, z),
            Point3::new(self.max.x, self.min.y, z),
            Point3::new(self.max.x, self.max.y, z),
            Point3::new(self.min.x, self.max.y, z),
        ]
    }

    pub fn contains(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

// ─── Colors ──────────────────────────────────────────────────────────────

/// 24-bit true color. Serialized as a `#RRGGBB` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RGB` or `#RRGGBB`. The leading `#` is optional.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let bytes = hex.as_bytes();
        match bytes.len() {
            3 => Some(Self::rgb(
                hex_val(bytes[0])? * 17,
                hex_val(bytes[1])? * 17,
                hex_val(bytes[2])? * 17,
            )),
            6 => Some(Self::rgb(
                hex_val(bytes[0])? << 4 | hex_val(bytes[1])?,
                hex_val(bytes[2])? << 4 | hex_val(bytes[3])?,
                hex_val(bytes[4])? << 4 | hex_val(bytes[5])?,
            )),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color `{s}`")))
    }
}

// ─── Text fields ─────────────────────────────────────────────────────────

/// A named, per-instance editable text value (a block attribute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextField {
    /// Unique within its instance; matched case-insensitively.
    pub tag: String,
    pub value: String,
    pub visible: bool,
    pub extents: Option<Extents>,
}

impl TextField {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
            visible: true,
            extents: None,
        }
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    #[must_use]
    pub fn with_extents(mut self, extents: Extents) -> Self {
        self.extents = Some(extents);
        self
    }
}

// ─── Typed parameters ────────────────────────────────────────────────────

/// Declared type of a typed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Distance,
    Angle,
    Integer,
    Point,
}

/// Runtime value of a typed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Text(String),
    Distance(f64),
    /// Radians.
    Angle(f64),
    Integer(i64),
    Point(Point3),
}

impl ParamValue {
    /// The runtime type of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Text(_) => ParamType::String,
            ParamValue::Distance(_) => ParamType::Distance,
            ParamValue::Angle(_) => ParamType::Angle,
            ParamValue::Integer(_) => ParamType::Integer,
            ParamValue::Point(_) => ParamType::Point,
        }
    }

    /// Convert `raw` to the same runtime type as `self`.
    ///
    /// Returns `None` when the string is not a valid value of that type.
    /// Non-finite numbers are rejected.
    pub fn coerce_from(&self, raw: &str) -> Option<ParamValue> {
        let trimmed = raw.trim();
        match self {
            ParamValue::Text(_) => Some(ParamValue::Text(raw.to_string())),
            ParamValue::Distance(_) => parse_finite(trimmed).map(ParamValue::Distance),
            ParamValue::Angle(_) => parse_finite(trimmed).map(ParamValue::Angle),
            ParamValue::Integer(_) => trimmed.parse::<i64>().ok().map(ParamValue::Integer),
            ParamValue::Point(_) => {
                let parts: Vec<f64> = trimmed
                    .split(',')
                    .map(|p| parse_finite(p.trim()))
                    .collect::<Option<_>>()?;
                match parts.as_slice() {
                    [x, y] => Some(ParamValue::Point(Point3::new(*x, *y, 0.0))),
                    [x, y, z] => Some(ParamValue::Point(Point3::new(*x, *y, *z))),
                    _ => None,
                }
            }
        }
    }

    /// The zero value for a declared type, where one is defined.
    pub fn zero_for(ty: ParamType) -> Option<ParamValue> {
        match ty {
            ParamType::String => Some(ParamValue::Text(String::new())),
            ParamType::Distance => Some(ParamValue::Distance(0.0)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Distance(v) | ParamValue::Angle(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Point(p) => write!(f, "{p}"),
        }
    }
}

/// A named, typed per-instance value of a dynamic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedParameter {
    pub name: String,
    pub declared: ParamType,
    pub value: ParamValue,
    /// Control points exposed for interactive editing.
    pub grips: SmallVec<[Point3; 2]>,
    pub read_only: bool,
}

impl TypedParameter {
    /// A parameter whose declared type matches its initial value.
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            declared: value.param_type(),
            value,
            grips: SmallVec::new(),
            read_only: false,
        }
    }

    #[must_use]
    pub fn with_grip(mut self, grip: Point3) -> Self {
        self.grips.push(grip);
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

// ─── Entities ────────────────────────────────────────────────────────────

/// Geometry kinds stored in a definition or a drawing space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Line {
        start: Point3,
        end: Point3,
    },
    Circle {
        center: Point3,
        radius: f64,
    },
    Polyline {
        points: Vec<Point3>,
    },
    /// Single-line text label.
    Text {
        content: String,
        position: Point3,
        height: f64,
        color: Color,
    },
    /// Declares a text field that instances of the definition carry.
    AttributeDefinition {
        tag: String,
        default: String,
        position: Point3,
        height: f64,
    },
}

/// A drawable element on a named layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub layer: String,
}

impl Entity {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            layer: "0".to_string(),
        }
    }

    #[must_use]
    pub fn on_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    /// Bounding region of the entity's geometry, if it has any.
    pub fn extents(&self) -> Option<Extents> {
        match &self.kind {
            EntityKind::Line { start, end } => Extents::from_points([*start, *end]),
            EntityKind::Circle { center, radius } => Some(Extents::new(
                Point3::new(center.x - radius, center.y - radius, center.z),
                Point3::new(center.x + radius, center.y + radius, center.z),
            )),
            EntityKind::Polyline { points } => Extents::from_points(points.iter().copied()),
            EntityKind::Text {
                content,
                position,
                height,
                ..
            } => Some(text_extents(content, *position, *height)),
            EntityKind::AttributeDefinition {
                default,
                position,
                height,
                ..
            } => Some(text_extents(default, *position, *height)),
        }
    }
}

fn text_extents(content: &str, position: Point3, height: f64) -> Extents {
    let width = content.chars().count() as f64 * height * TEXT_WIDTH_FACTOR;
    Extents::new(
        position,
        Point3::new(position.x + width, position.y + height, position.z),
    )
}

// ─── Blocks & layers ─────────────────────────────────────────────────────

/// Shared template for block instances. Its geometry is owned by it in the
/// document and enumerated through `UnitOfWork::owned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    pub base_point: Point3,
}

/// A placed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInstance {
    pub definition: ObjectId,
    pub position: Point3,
    pub scale: Scale3,
    /// Radians.
    pub rotation: f64,
    pub layer: String,
    pub fields: Vec<TextField>,
    /// `None` for static blocks that do not support typed parameters.
    pub parameters: Option<Vec<TypedParameter>>,
}

impl BlockInstance {
    pub fn new(definition: ObjectId, position: Point3) -> Self {
        Self {
            definition,
            position,
            scale: Scale3::default(),
            rotation: 0.0,
            layer: "0".to_string(),
            fields: Vec::new(),
            parameters: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: TextField) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, param: TypedParameter) -> Self {
        self.parameters.get_or_insert_with(Vec::new).push(param);
        self
    }

    /// First field whose tag matches case-insensitively (full Unicode
    /// lowercasing, so `Размер` matches `РАЗМЕР`).
    pub fn field(&self, tag: &str) -> Option<&TextField> {
        let wanted = tag.to_lowercase();
        self.fields.iter().find(|f| f.tag.to_lowercase() == wanted)
    }

    pub fn field_mut(&mut self, tag: &str) -> Option<&mut TextField> {
        let wanted = tag.to_lowercase();
        self.fields.iter_mut().find(|f| f.tag.to_lowercase() == wanted)
    }

    /// Typed parameter by exact name.
    pub fn parameter(&self, name: &str) -> Option<&TypedParameter> {
        self.parameters.as_ref()?.iter().find(|p| p.name == name)
    }

    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut TypedParameter> {
        self.parameters.as_mut()?.iter_mut().find(|p| p.name == name)
    }

    /// Typed parameters, empty for static blocks.
    pub fn parameters(&self) -> &[TypedParameter] {
        self.parameters.as_deref().unwrap_or(&[])
    }

    /// Whether the instance exposes a non-empty typed-parameter collection.
    pub fn is_dynamic(&self) -> bool {
        !self.parameters().is_empty()
    }
}

/// A named drawing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub plottable: bool,
    pub color: Color,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plottable: true,
            color: Color::WHITE,
        }
    }
}

// ─── Document objects ────────────────────────────────────────────────────

/// Any object resolvable through a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DbObject {
    Definition(BlockDefinition),
    Instance(BlockInstance),
    Entity(Entity),
    Layer(Layer),
}

impl DbObject {
    /// Short type name used in `WrongType` diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DbObject::Definition(_) => "block definition",
            DbObject::Instance(_) => "block instance",
            DbObject::Entity(_) => "entity",
            DbObject::Layer(_) => "layer",
        }
    }
}
