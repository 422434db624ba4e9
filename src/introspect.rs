//! Introspection: the type descriptions that value trees are built from.
//!
//! A [`Field`] describes the type of one node of a pvData tree. Structures are
//! ordered, named collections of fields, and every field inside a structure has
//! a pre-order *offset*: the structure itself is offset 0, its first child is
//! offset 1, the first child's own children (if it is a structure) follow
//! immediately, and so on. The span of a field, [`Field::number_fields`], is the
//! number of offsets its subtree occupies.
//!
//! Types are immutable once built and shared through [`Arc`]. They are created
//! through a [`FieldFactory`], which validates names; [`FieldCreate`] is the
//! standard implementation and [`FieldBuilder`] a convenience wrapper.

use std::{collections::HashSet, fmt, sync::Arc};

use thiserror::Error;

use crate::scalar::ScalarType;

/// Default type id of a structure that wasn't given one
pub const DEFAULT_STRUCTURE_ID: &str = "structure";
/// Default type id of a union that wasn't given one
pub const DEFAULT_UNION_ID: &str = "union";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntrospectError {
    #[error("Empty field name")]
    EmptyName,
    #[error("Illegal field name: '{0}'")]
    IllegalName(String),
    #[error("Duplicate field name: '{0}'")]
    DuplicateName(String),
    #[error("Mismatched number of names ({0}) and fields ({1})")]
    LengthMismatch(usize, usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    ScalarArray,
    Structure,
    StructureArray,
    Union,
    UnionArray,
}

/// The type of a single node in a pvData tree
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar(ScalarType),
    ScalarArray(ScalarType),
    Structure(Arc<Structure>),
    StructureArray(Arc<Structure>),
    Union(Arc<Union>),
    UnionArray(Arc<Union>),
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Scalar(_) => FieldKind::Scalar,
            Field::ScalarArray(_) => FieldKind::ScalarArray,
            Field::Structure(_) => FieldKind::Structure,
            Field::StructureArray(_) => FieldKind::StructureArray,
            Field::Union(_) => FieldKind::Union,
            Field::UnionArray(_) => FieldKind::UnionArray,
        }
    }

    /// Number of offsets this field's subtree occupies. Always 1 except for structures.
    pub fn number_fields(&self) -> usize {
        match self {
            Field::Structure(s) => s.number_fields(),
            _ => 1,
        }
    }

    /// The type id, e.g. `double`, `double[]`, `alarm_t`
    pub fn id(&self) -> String {
        match self {
            Field::Scalar(t) => t.name().to_string(),
            Field::ScalarArray(t) => format!("{}[]", t.name()),
            Field::Structure(s) => s.id().to_string(),
            Field::StructureArray(s) => format!("{}[]", s.id()),
            Field::Union(u) => u.id().to_string(),
            Field::UnionArray(u) => format!("{}[]", u.id()),
        }
    }

    pub fn as_structure(&self) -> Option<&Arc<Structure>> {
        match self {
            Field::Structure(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Arc<Structure>> for Field {
    fn from(value: Arc<Structure>) -> Self {
        Field::Structure(value)
    }
}

/// An ordered set of named fields
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    id: String,
    names: Vec<String>,
    fields: Vec<Field>,
    /// Cached span of the whole structure, including itself
    number_fields: usize,
}

impl Structure {
    /// Build without validating names. Only factories should call this.
    fn new_unchecked(id: &str, names: Vec<String>, fields: Vec<Field>) -> Self {
        let number_fields = 1 + fields.iter().map(Field::number_fields).sum::<usize>();
        Structure {
            id: id.to_string(),
            names,
            fields,
            number_fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn names(&self) -> &[String] {
        &self.names
    }
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
    /// Number of direct children
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
    /// Span of this structure: itself plus every descendant
    pub fn number_fields(&self) -> usize {
        self.number_fields
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.names.iter().map(String::as_str).zip(self.fields.iter())
    }

    /// Direct children with their offsets relative to this structure
    pub fn children(&self) -> impl Iterator<Item = (usize, &str, &Field)> {
        self.iter().scan(1usize, |offset, (name, field)| {
            let this = *offset;
            *offset += field.number_fields();
            Some((this, name, field))
        })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Look up a direct child by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// Look up a descendant by dotted path, e.g. `alarm.severity`
    pub fn field_by_path(&self, path: &str) -> Option<&Field> {
        let (first, rest) = match path.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };
        let field = self.field(first)?;
        match rest {
            None => Some(field),
            Some(rest) => field.as_structure()?.field_by_path(rest),
        }
    }

    /// Offset of a descendant given by dotted path
    pub fn offset_of(&self, path: &str) -> Option<usize> {
        let (first, rest) = match path.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };
        let (offset, _, field) = self.children().find(|(_, name, _)| *name == first)?;
        match rest {
            None => Some(offset),
            Some(rest) => Some(offset + field.as_structure()?.offset_of(rest)?),
        }
    }

    /// The descendant at `offset`. Offset 0 is this structure, which is not a field of itself.
    pub fn field_at(&self, offset: usize) -> Option<&Field> {
        self.lookup_offset(offset).map(|(_, field)| field)
    }

    /// Dotted path of the descendant at `offset`
    pub fn full_name_at(&self, offset: usize) -> Option<String> {
        if offset == 0 {
            return Some(String::new());
        }
        for (child_offset, name, field) in self.children() {
            if offset == child_offset {
                return Some(name.to_string());
            }
            if offset < child_offset + field.number_fields() {
                let sub = field.as_structure()?;
                return Some(format!("{name}.{}", sub.full_name_at(offset - child_offset)?));
            }
        }
        None
    }

    fn lookup_offset(&self, offset: usize) -> Option<(&str, &Field)> {
        for (child_offset, name, field) in self.children() {
            if offset == child_offset {
                return Some((name, field));
            }
            if offset < child_offset + field.number_fields() {
                return field.as_structure()?.lookup_offset(offset - child_offset);
            }
        }
        None
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn _write(f: &mut fmt::Formatter<'_>, s: &Structure, indent: usize) -> fmt::Result {
            for (name, field) in s.iter() {
                write!(f, "\n{:indent$}{} {name}", "", field.id(), indent = indent * 4)?;
                match field {
                    Field::Structure(sub) | Field::StructureArray(sub) => {
                        _write(f, sub, indent + 1)?
                    }
                    Field::Union(u) | Field::UnionArray(u) => {
                        for (name, field) in u.iter() {
                            write!(
                                f,
                                "\n{:indent$}{} {name}",
                                "",
                                field.id(),
                                indent = (indent + 1) * 4
                            )?;
                        }
                    }
                    _ => (),
                }
            }
            Ok(())
        }
        write!(f, "{}", self.id)?;
        _write(f, self, 1)
    }
}

/// A choice of one of several named fields. With no fields, a variant union
/// that can hold any type.
#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    id: String,
    names: Vec<String>,
    fields: Vec<Field>,
}

impl Union {
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn is_variant(&self) -> bool {
        self.fields.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.names.iter().map(String::as_str).zip(self.fields.iter())
    }
    pub fn field(&self, index: usize) -> Option<(&str, &Field)> {
        Some((self.names.get(index)?.as_str(), self.fields.get(index)?))
    }
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Creates validated introspection objects.
///
/// Passed explicitly to anything that needs to build types, so callers can
/// substitute their own (e.g. caching) implementation.
pub trait FieldFactory {
    fn create_structure(
        &self,
        id: Option<&str>,
        names: Vec<String>,
        fields: Vec<Field>,
    ) -> Result<Arc<Structure>, IntrospectError>;

    fn create_union(
        &self,
        id: Option<&str>,
        names: Vec<String>,
        fields: Vec<Field>,
    ) -> Result<Arc<Union>, IntrospectError>;

    fn create_variant_union(&self) -> Arc<Union> {
        Arc::new(Union {
            id: DEFAULT_UNION_ID.to_string(),
            names: Vec::new(),
            fields: Vec::new(),
        })
    }
}

/// The standard [`FieldFactory`]. Names must be non-empty identifiers, unique
/// within their structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldCreate;

impl FieldCreate {
    fn validate(names: &[String], fields: &[Field]) -> Result<(), IntrospectError> {
        if names.len() != fields.len() {
            return Err(IntrospectError::LengthMismatch(names.len(), fields.len()));
        }
        let mut seen = HashSet::new();
        for name in names {
            let mut chars = name.chars();
            match chars.next() {
                None => return Err(IntrospectError::EmptyName),
                Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
                    return Err(IntrospectError::IllegalName(name.clone()));
                }
                _ => (),
            }
            if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(IntrospectError::IllegalName(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(IntrospectError::DuplicateName(name.clone()));
            }
        }
        Ok(())
    }
}

impl FieldFactory for FieldCreate {
    fn create_structure(
        &self,
        id: Option<&str>,
        names: Vec<String>,
        fields: Vec<Field>,
    ) -> Result<Arc<Structure>, IntrospectError> {
        Self::validate(&names, &fields)?;
        Ok(Arc::new(Structure::new_unchecked(
            id.unwrap_or(DEFAULT_STRUCTURE_ID),
            names,
            fields,
        )))
    }

    fn create_union(
        &self,
        id: Option<&str>,
        names: Vec<String>,
        fields: Vec<Field>,
    ) -> Result<Arc<Union>, IntrospectError> {
        Self::validate(&names, &fields)?;
        Ok(Arc::new(Union {
            id: id.unwrap_or(DEFAULT_UNION_ID).to_string(),
            names,
            fields,
        }))
    }
}

/// Incrementally assemble a structure or union
pub struct FieldBuilder<'a> {
    factory: &'a dyn FieldFactory,
    id: Option<String>,
    names: Vec<String>,
    fields: Vec<Field>,
}

impl Default for FieldBuilder<'static> {
    fn default() -> Self {
        FieldBuilder::with_factory(&FieldCreate)
    }
}

impl FieldBuilder<'static> {
    pub fn new() -> Self {
        FieldBuilder::default()
    }
}

impl<'a> FieldBuilder<'a> {
    pub fn with_factory(factory: &'a dyn FieldFactory) -> Self {
        FieldBuilder {
            factory,
            id: None,
            names: Vec::new(),
            fields: Vec::new(),
        }
    }
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
    pub fn add(mut self, name: &str, field: Field) -> Self {
        self.names.push(name.to_string());
        self.fields.push(field);
        self
    }
    pub fn add_scalar(self, name: &str, scalar_type: ScalarType) -> Self {
        self.add(name, Field::Scalar(scalar_type))
    }
    pub fn add_array(self, name: &str, scalar_type: ScalarType) -> Self {
        self.add(name, Field::ScalarArray(scalar_type))
    }
    pub fn create_structure(self) -> Result<Arc<Structure>, IntrospectError> {
        self.factory
            .create_structure(self.id.as_deref(), self.names, self.fields)
    }
    pub fn create_union(self) -> Result<Arc<Union>, IntrospectError> {
        self.factory
            .create_union(self.id.as_deref(), self.names, self.fields)
    }
}
