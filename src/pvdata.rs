//! Value trees: instances of the types described in [`crate::introspect`].
//!
//! A [`PVStructure`] owns one value per field of its [`Structure`]. Sub-fields
//! can be reached by name, by dotted path, or by pre-order offset, matching the
//! offset numbering of the structure type.
//!
//! Elements of structure arrays are held behind [`Arc`] and shared between
//! copies of the array; copying an array copies references, not elements.

use std::{fmt, sync::Arc};

use crate::{
    introspect::{Field, Structure, Union},
    scalar::{ScalarArrayValue, ScalarValue, ValueError},
};

#[derive(Debug, Clone, PartialEq)]
pub enum PVField {
    Scalar(ScalarValue),
    ScalarArray(ScalarArrayValue),
    Structure(PVStructure),
    StructureArray(PVStructureArray),
    Union(PVUnion),
    UnionArray(PVUnionArray),
}

impl PVField {
    /// Create a default-valued instance of a field type
    pub fn new(field: &Field) -> PVField {
        match field {
            Field::Scalar(t) => PVField::Scalar(t.default_value()),
            Field::ScalarArray(t) => PVField::ScalarArray(t.empty_array()),
            Field::Structure(s) => PVField::Structure(PVStructure::new(s.clone())),
            Field::StructureArray(s) => PVField::StructureArray(PVStructureArray::new(s.clone())),
            Field::Union(u) => PVField::Union(PVUnion::new(u.clone())),
            Field::UnionArray(u) => PVField::UnionArray(PVUnionArray::new(u.clone())),
        }
    }

    /// The introspection type of this value
    pub fn field(&self) -> Field {
        match self {
            PVField::Scalar(v) => Field::Scalar(v.scalar_type()),
            PVField::ScalarArray(v) => Field::ScalarArray(v.element_type()),
            PVField::Structure(v) => Field::Structure(v.structure.clone()),
            PVField::StructureArray(v) => Field::StructureArray(v.element.clone()),
            PVField::Union(v) => Field::Union(v.union.clone()),
            PVField::UnionArray(v) => Field::UnionArray(v.union.clone()),
        }
    }

    pub fn number_fields(&self) -> usize {
        match self {
            PVField::Structure(s) => s.number_fields(),
            _ => 1,
        }
    }

    /// Replace this value with a copy of `other`, which must be of the same type
    pub fn copy_from(&mut self, other: &PVField) {
        debug_assert!(
            self.same_type(other),
            "copy between different types: {} <- {}",
            self.field().id(),
            other.field().id()
        );
        self.clone_from(other);
    }

    fn same_type(&self, other: &PVField) -> bool {
        match (self, other) {
            (PVField::Structure(a), PVField::Structure(b)) => a.same_type(b),
            _ => self.field() == other.field(),
        }
    }

    /// The descendant at `offset`, relative to this field. Offset 0 is the field itself.
    pub fn at_offset(&self, offset: usize) -> Option<&PVField> {
        match (offset, self) {
            (0, _) => Some(self),
            (_, PVField::Structure(s)) => s.sub_field_at(offset),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&PVStructure> {
        match self {
            PVField::Structure(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_structure_mut(&mut self) -> Option<&mut PVStructure> {
        match self {
            PVField::Structure(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            PVField::Scalar(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_scalar_mut(&mut self) -> Option<&mut ScalarValue> {
        match self {
            PVField::Scalar(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_scalar_array(&self) -> Option<&ScalarArrayValue> {
        match self {
            PVField::ScalarArray(v) => Some(v),
            _ => None,
        }
    }

    /// Replace the contents of a scalar array, keeping its element type
    pub fn put_array(&mut self, values: ScalarArrayValue) -> Result<(), ValueError> {
        let PVField::ScalarArray(current) = self else {
            return Err(ValueError::WrongKind("scalar array"));
        };
        *current = values.convert_to(current.element_type())?;
        Ok(())
    }
}

/// An instance of a [`Structure`]
#[derive(Debug, Clone)]
pub struct PVStructure {
    structure: Arc<Structure>,
    fields: Vec<PVField>,
}

impl PVStructure {
    pub fn new(structure: Arc<Structure>) -> Self {
        let fields = structure.fields().iter().map(PVField::new).collect();
        PVStructure { structure, fields }
    }

    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// Span of this structure, including itself
    pub fn number_fields(&self) -> usize {
        self.structure.number_fields()
    }

    pub fn fields(&self) -> &[PVField] {
        &self.fields
    }

    /// Children for in-place update. Callers must keep each child's type.
    pub(crate) fn fields_mut(&mut self) -> &mut [PVField] {
        &mut self.fields
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PVField)> {
        self.structure
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.fields.iter())
    }

    /// Direct child by name
    pub fn child(&self, name: &str) -> Option<&PVField> {
        self.structure.index_of(name).map(|i| &self.fields[i])
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut PVField> {
        self.structure.index_of(name).map(|i| &mut self.fields[i])
    }

    /// Descendant by dotted path, e.g. `alarm.severity`
    pub fn sub_field(&self, path: &str) -> Option<&PVField> {
        match path.split_once('.') {
            None => self.child(path),
            Some((first, rest)) => self.child(first)?.as_structure()?.sub_field(rest),
        }
    }

    pub fn sub_field_mut(&mut self, path: &str) -> Option<&mut PVField> {
        match path.split_once('.') {
            None => self.child_mut(path),
            Some((first, rest)) => self
                .child_mut(first)?
                .as_structure_mut()?
                .sub_field_mut(rest),
        }
    }

    /// Descendant structure by dotted path
    pub fn sub_structure(&self, path: &str) -> Option<&PVStructure> {
        self.sub_field(path)?.as_structure()
    }

    /// Descendant at a pre-order offset. Offset 0 is this structure itself, not a sub-field.
    pub fn sub_field_at(&self, offset: usize) -> Option<&PVField> {
        let mut current = 1;
        for field in &self.fields {
            let span = field.number_fields();
            if offset == current {
                return Some(field);
            }
            if offset < current + span {
                return field.as_structure()?.sub_field_at(offset - current);
            }
            current += span;
        }
        None
    }

    pub fn sub_field_at_mut(&mut self, offset: usize) -> Option<&mut PVField> {
        let mut current = 1;
        for field in &mut self.fields {
            let span = field.number_fields();
            if offset == current {
                return Some(field);
            }
            if offset < current + span {
                return field.as_structure_mut()?.sub_field_at_mut(offset - current);
            }
            current += span;
        }
        None
    }

    /// Replace every value with those of `other`, which must have the same type
    pub fn copy_from(&mut self, other: &PVStructure) {
        debug_assert!(
            self.same_type(other),
            "copy between different structures: {} <- {}",
            self.structure.id(),
            other.structure.id()
        );
        self.fields.clone_from(&other.fields);
    }

    fn same_type(&self, other: &PVStructure) -> bool {
        Arc::ptr_eq(&self.structure, &other.structure) || self.structure == other.structure
    }

    /// Read a scalar at `path` as a double
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.sub_field(path)?.as_scalar()?.as_f64()
    }

    /// Write a double into the scalar at `path`, converting to its type
    pub fn put_f64(&mut self, path: &str, value: f64) -> Result<(), ValueError> {
        self.sub_field_mut(path)
            .ok_or_else(|| ValueError::NoSuchField(path.to_string()))?
            .as_scalar_mut()
            .ok_or(ValueError::WrongKind("scalar"))?
            .put_f64(value)
    }

    /// Read a string scalar at `path`
    pub fn get_string(&self, path: &str) -> Option<&str> {
        self.sub_field(path)?.as_scalar()?.as_str()
    }

    /// Write a string scalar at `path`
    pub fn put_string(&mut self, path: &str, value: &str) -> Result<(), ValueError> {
        match self.sub_field_mut(path) {
            Some(PVField::Scalar(ScalarValue::String(s))) => {
                value.clone_into(s);
                Ok(())
            }
            Some(_) => Err(ValueError::WrongKind("string")),
            None => Err(ValueError::NoSuchField(path.to_string())),
        }
    }
}

impl PartialEq for PVStructure {
    fn eq(&self, other: &Self) -> bool {
        self.same_type(other) && self.fields == other.fields
    }
}

/// An array of structures of one type. Elements are shared, not owned.
#[derive(Debug, Clone)]
pub struct PVStructureArray {
    element: Arc<Structure>,
    values: Vec<Arc<PVStructure>>,
}

impl PVStructureArray {
    pub fn new(element: Arc<Structure>) -> Self {
        PVStructureArray {
            element,
            values: Vec::new(),
        }
    }
    pub fn element(&self) -> &Arc<Structure> {
        &self.element
    }
    pub fn values(&self) -> &[Arc<PVStructure>] {
        &self.values
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// Append an element, which must be of the array's element type
    pub fn push(&mut self, value: Arc<PVStructure>) {
        assert!(
            value.structure() == &self.element,
            "structure array element of the wrong type"
        );
        self.values.push(value);
    }
    pub fn replace(&mut self, values: Vec<Arc<PVStructure>>) {
        self.values.clear();
        for value in values {
            self.push(value);
        }
    }
}

impl PartialEq for PVStructureArray {
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a == b)
    }
}

/// An instance of a [`Union`]: either empty, or holding one of its fields
#[derive(Debug, Clone, PartialEq)]
pub struct PVUnion {
    union: Arc<Union>,
    selected: Option<usize>,
    value: Option<Box<PVField>>,
}

impl PVUnion {
    pub fn new(union: Arc<Union>) -> Self {
        PVUnion {
            union,
            selected: None,
            value: None,
        }
    }
    pub fn union(&self) -> &Arc<Union> {
        &self.union
    }
    pub fn value(&self) -> Option<&PVField> {
        self.value.as_deref()
    }
    /// Name of the selected member, if any
    pub fn selected_name(&self) -> Option<&str> {
        Some(self.union.field(self.selected?)?.0)
    }
    /// Select a member of a regular union by name, resetting it to a default value
    pub fn select(&mut self, name: &str) -> Option<&mut PVField> {
        let index = self.union.index_of(name)?;
        let (_, field) = self.union.field(index)?;
        self.selected = Some(index);
        self.value = Some(Box::new(PVField::new(field)));
        self.value.as_deref_mut()
    }
    /// Store any value in a variant union
    pub fn set_variant(&mut self, value: PVField) -> Result<(), ValueError> {
        if !self.union.is_variant() {
            return Err(ValueError::WrongKind("variant union"));
        }
        self.value = Some(Box::new(value));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PVUnionArray {
    union: Arc<Union>,
    values: Vec<PVUnion>,
}

impl PVUnionArray {
    pub fn new(union: Arc<Union>) -> Self {
        PVUnionArray {
            union,
            values: Vec::new(),
        }
    }
    pub fn values(&self) -> &[PVUnion] {
        &self.values
    }
    pub fn push(&mut self, value: PVUnion) {
        assert!(value.union == self.union, "union array element of the wrong type");
        self.values.push(value);
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, name: &str, field: &PVField, indent: usize) -> fmt::Result {
    let pad = indent * 4;
    match field {
        PVField::Scalar(v) => write!(f, "\n{:pad$}{} {name} {v}", "", v.scalar_type()),
        PVField::ScalarArray(v) => write!(f, "\n{:pad$}{}[] {name} {v}", "", v.element_type()),
        PVField::Structure(s) => {
            write!(f, "\n{:pad$}{} {name}", "", s.structure.id())?;
            write_children(f, s, indent + 1)
        }
        PVField::StructureArray(a) => {
            write!(f, "\n{:pad$}{}[] {name}", "", a.element.id())?;
            for element in &a.values {
                write!(f, "\n{:pad$}{}", "", element.structure.id(), pad = pad + 4)?;
                write_children(f, element, indent + 2)?;
            }
            Ok(())
        }
        PVField::Union(u) => write_union(f, name, u, indent),
        PVField::UnionArray(a) => {
            write!(f, "\n{:pad$}{}[] {name}", "", a.union.id())?;
            for element in &a.values {
                write_union(f, "", element, indent + 1)?;
            }
            Ok(())
        }
    }
}

fn write_union(f: &mut fmt::Formatter<'_>, name: &str, u: &PVUnion, indent: usize) -> fmt::Result {
    write!(f, "\n{:pad$}{} {name}", "", u.union.id(), pad = indent * 4)?;
    match &u.value {
        Some(value) => write_field(f, u.selected_name().unwrap_or(""), value, indent + 1),
        None => write!(f, "\n{:pad$}(none)", "", pad = (indent + 1) * 4),
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, s: &PVStructure, indent: usize) -> fmt::Result {
    for (name, field) in s.iter() {
        write_field(f, name, field, indent)?;
    }
    Ok(())
}

impl fmt::Display for PVStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.structure.id())?;
        write_children(f, self, 1)
    }
}

impl fmt::Display for PVField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PVField::Scalar(v) => write!(f, "{v}"),
            PVField::ScalarArray(v) => write!(f, "{v}"),
            PVField::Structure(s) => write!(f, "{s}"),
            other => {
                let mut text = String::new();
                // Reuse the indented writer, then drop the leading newline
                struct Adapter<'a>(&'a PVField);
                impl fmt::Display for Adapter<'_> {
                    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write_field(f, "", self.0, 0)
                    }
                }
                fmt::write(&mut text, format_args!("{}", Adapter(other)))?;
                f.write_str(text.trim_start_matches('\n'))
            }
        }
    }
}
