//! Parser for the pvRequest mini-language.
//!
//! A request such as `record[process=true]field(alarm,power{value,alarm})`
//! selects fields of a record, optionally with per-field options. It is parsed
//! into a [`SelectionTree`]: a structure with one child per clause (`record`,
//! `field`, `getField`, `putField`), where every selected name becomes a
//! (possibly empty) sub-structure and options live in a leading `_options`
//! structure of strings.
//!
//! Parsing happens in three steps. The text is first read into a small syntax
//! tree, then the type of the selection is built through a [`FieldFactory`],
//! and finally the option strings are written into an instance of that type.

use std::{fmt, slice};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    introspect::{Field, FieldCreate, FieldFactory, IntrospectError, Structure},
    pvdata::{PVField, PVStructure},
    scalar::ScalarType,
};

/// Name of the pseudo-field holding per-field options
pub const OPTIONS: &str = "_options";

const CLAUSES: [(&str, char); 4] = [
    ("record", '['),
    ("field", '('),
    ("putField", '('),
    ("getField", '('),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Mismatched {open}{close} in request '{request}'")]
    Mismatched {
        open: char,
        close: char,
        request: String,
    },
    #[error("Illegal option '{option}' in request '{request}'")]
    IllegalOption { option: String, request: String },
    #[error("Empty option list at {position} in request '{request}'")]
    EmptyOptions { position: usize, request: String },
    #[error("Empty field name at {position} in request '{request}'")]
    EmptyFieldName { position: usize, request: String },
    #[error("Empty {{}} at {position} in request '{request}'")]
    EmptyBraces { position: usize, request: String },
    #[error("Clause '{clause}' given more than once in request '{request}'")]
    DuplicateClause { clause: String, request: String },
    #[error("Unexpected character at {position} in request '{request}'")]
    Unexpected { position: usize, request: String },
    #[error("Invalid selection: {0}")]
    Introspect(#[from] IntrospectError),
}

type OptionList<'r> = Vec<(&'r str, &'r str)>;

/// One selected name, with what follows it
#[derive(Debug)]
struct FieldSpec<'r> {
    name: &'r str,
    options: Option<OptionList<'r>>,
    selector: Selector<'r>,
}

#[derive(Debug)]
enum Selector<'r> {
    None,
    /// `name.rest`
    Path(Box<FieldSpec<'r>>),
    /// `name{a,b}`
    List(Vec<FieldSpec<'r>>),
}

impl<'r> FieldSpec<'r> {
    fn children(&self) -> &[FieldSpec<'r>] {
        match &self.selector {
            Selector::None => &[],
            Selector::Path(spec) => slice::from_ref(spec.as_ref()),
            Selector::List(list) => list,
        }
    }
}

#[derive(Debug, Default)]
struct Clauses<'r> {
    record: Option<OptionList<'r>>,
    field: Option<Vec<FieldSpec<'r>>>,
    get_field: Option<Vec<FieldSpec<'r>>>,
    put_field: Option<Vec<FieldSpec<'r>>>,
}

/// Split a comma separated list at the commas that are not nested inside
/// `()`, `[]` or `{}`. Each item is returned with its byte offset.
pub fn split_top_level(list: &str) -> Vec<(usize, &str)> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push((start, &list[start..i]));
                start = i + 1;
            }
            _ => (),
        }
    }
    items.push((start, &list[start..]));
    items
}

/// Index of the bracket closing the one at `open`, honouring nesting
fn closing(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => (),
        }
    }
    None
}

fn partner(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        '}' => '{',
        '(' => ')',
        '[' => ']',
        '{' => '}',
        other => other,
    }
}

/// Reads the text of one request into [`Clauses`]
struct Syntax<'r> {
    /// The request with blanks removed
    text: &'r str,
    /// The request as given, for error messages
    request: &'r str,
}

impl<'r> Syntax<'r> {
    fn mismatched(&self, open: char) -> ParseError {
        ParseError::Mismatched {
            open,
            close: partner(open),
            request: self.request.to_string(),
        }
    }
    fn unexpected(&self, position: usize) -> ParseError {
        ParseError::Unexpected {
            position,
            request: self.request.to_string(),
        }
    }

    fn check_balance(&self) -> Result<(), ParseError> {
        let mut open = Vec::new();
        for c in self.text.chars() {
            match c {
                '(' | '[' | '{' => open.push(c),
                ')' | ']' | '}' => match open.pop() {
                    Some(o) if o == partner(c) => (),
                    Some(o) => return Err(self.mismatched(o)),
                    None => return Err(self.mismatched(partner(c))),
                },
                _ => (),
            }
        }
        match open.pop() {
            Some(o) => Err(self.mismatched(o)),
            None => Ok(()),
        }
    }

    fn clauses(&self) -> Result<Clauses<'r>, ParseError> {
        self.check_balance()?;
        let mut clauses = Clauses::default();
        let mut pos = 0;
        while pos < self.text.len() {
            let rest = &self.text[pos..];
            if rest.starts_with(',') {
                pos += 1;
                continue;
            }
            let Some((keyword, open)) = CLAUSES.into_iter().find(|&(keyword, open)| {
                rest.strip_prefix(keyword)
                    .is_some_and(|after| after.starts_with(open))
            }) else {
                return Err(self.unexpected(pos));
            };
            let close = closing(rest, keyword.len()).ok_or_else(|| self.mismatched(open))?;
            let body = &rest[keyword.len() + 1..close];
            let body_at = pos + keyword.len() + 1;

            let duplicate = match keyword {
                "record" => clauses.record.replace(self.options(body)?).is_some(),
                _ => {
                    let list = if body.is_empty() {
                        Vec::new()
                    } else {
                        self.field_list(body, body_at)?
                    };
                    let slot = match keyword {
                        "field" => &mut clauses.field,
                        "putField" => &mut clauses.put_field,
                        _ => &mut clauses.get_field,
                    };
                    slot.replace(list).is_some()
                }
            };
            if duplicate {
                return Err(ParseError::DuplicateClause {
                    clause: keyword.to_string(),
                    request: self.request.to_string(),
                });
            }
            pos += close + 1;
        }
        Ok(clauses)
    }

    fn options(&self, body: &'r str) -> Result<OptionList<'r>, ParseError> {
        if body.is_empty() {
            return Ok(Vec::new());
        }
        body.split(',')
            .map(|item| match item.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key, value)),
                _ => Err(ParseError::IllegalOption {
                    option: item.to_string(),
                    request: self.request.to_string(),
                }),
            })
            .collect()
    }

    fn field_list(&self, list: &'r str, at: usize) -> Result<Vec<FieldSpec<'r>>, ParseError> {
        split_top_level(list)
            .into_iter()
            .map(|(offset, item)| self.field_spec(item, at + offset))
            .collect()
    }

    fn field_spec(&self, item: &'r str, at: usize) -> Result<FieldSpec<'r>, ParseError> {
        let name_end = item.find(['.', '[', '{']).unwrap_or(item.len());
        let name = &item[..name_end];
        if name.is_empty() {
            return Err(ParseError::EmptyFieldName {
                position: at,
                request: self.request.to_string(),
            });
        }
        let mut rest = &item[name_end..];
        let mut rest_at = at + name_end;

        let mut options = None;
        if rest.starts_with('[') {
            let close = rest.find(']').ok_or_else(|| self.mismatched('['))?;
            let body = &rest[1..close];
            if body.is_empty() {
                return Err(ParseError::EmptyOptions {
                    position: rest_at,
                    request: self.request.to_string(),
                });
            }
            options = Some(self.options(body)?);
            rest = &rest[close + 1..];
            rest_at += close + 1;
        }

        let selector = match rest.chars().next() {
            None => Selector::None,
            Some('.') => Selector::Path(Box::new(self.field_spec(&rest[1..], rest_at + 1)?)),
            Some('{') => {
                let close = closing(rest, 0).ok_or_else(|| self.mismatched('{'))?;
                let body = &rest[1..close];
                if body.is_empty() {
                    return Err(ParseError::EmptyBraces {
                        position: rest_at,
                        request: self.request.to_string(),
                    });
                }
                if close + 1 < rest.len() {
                    return Err(self.unexpected(rest_at + close + 1));
                }
                Selector::List(self.field_list(body, rest_at + 1)?)
            }
            Some(_) => return Err(self.unexpected(rest_at)),
        };
        Ok(FieldSpec {
            name,
            options,
            selector,
        })
    }
}

/// A parsed pvRequest
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTree(PVStructure);

impl SelectionTree {
    pub fn pv_structure(&self) -> &PVStructure {
        &self.0
    }
    pub fn into_inner(self) -> PVStructure {
        self.0
    }
    pub fn structure(&self) -> &Structure {
        self.0.structure()
    }
    /// True for a request that selected nothing at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn field(&self) -> Option<&PVStructure> {
        self.0.sub_structure("field")
    }
    pub fn put_field(&self) -> Option<&PVStructure> {
        self.0.sub_structure("putField")
    }
    pub fn get_field(&self) -> Option<&PVStructure> {
        self.0.sub_structure("getField")
    }
    /// The options given in the `record[...]` clause
    pub fn record_options(&self) -> Option<&PVStructure> {
        self.0.sub_structure("record")?.sub_structure(OPTIONS)
    }
    /// Option `key` of the selection at `path`, e.g. `("field.timeStamp", "algorithm")`
    pub fn get_option(&self, path: &str, key: &str) -> Option<&str> {
        self.0
            .sub_structure(path)?
            .sub_structure(OPTIONS)?
            .get_string(key)
    }
}

impl AsRef<PVStructure> for SelectionTree {
    fn as_ref(&self) -> &PVStructure {
        &self.0
    }
}

impl fmt::Display for SelectionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Turns pvRequest strings into [`SelectionTree`]s, building types through
/// the given factory.
#[derive(Clone, Copy)]
pub struct RequestParser<'a> {
    factory: &'a dyn FieldFactory,
}

impl Default for RequestParser<'static> {
    fn default() -> Self {
        RequestParser {
            factory: &FieldCreate,
        }
    }
}

impl RequestParser<'static> {
    pub fn new() -> Self {
        RequestParser::default()
    }
}

impl<'a> RequestParser<'a> {
    pub fn with_factory(factory: &'a dyn FieldFactory) -> Self {
        RequestParser { factory }
    }

    pub fn parse(&self, request: &str) -> Result<SelectionTree, ParseError> {
        let result = self.parse_inner(request);
        match &result {
            Ok(tree) => trace!(
                "Parsed request '{request}' into {} fields",
                tree.pv_structure().number_fields()
            ),
            Err(e) => debug!("Failed to parse request: {e}"),
        }
        result
    }

    fn parse_inner(&self, request: &str) -> Result<SelectionTree, ParseError> {
        let mut text: String = request.chars().filter(|c| !c.is_whitespace()).collect();
        if text.is_empty() {
            let empty = self.factory.create_structure(None, Vec::new(), Vec::new())?;
            return Ok(SelectionTree(PVStructure::new(empty)));
        }
        if !CLAUSES
            .iter()
            .any(|(keyword, open)| text.contains(&format!("{keyword}{open}")))
        {
            text = format!("field({text})");
        }
        let syntax = Syntax {
            text: &text,
            request,
        };
        let clauses = syntax.clauses()?;

        let mut names = Vec::new();
        let mut fields: Vec<Field> = Vec::new();
        if let Some(options) = &clauses.record {
            let options = (!options.is_empty()).then_some(options.as_slice());
            names.push("record".to_string());
            fields.push(self.level(options, &[])?.into());
        }
        for (name, list) in [
            ("field", &clauses.field),
            ("getField", &clauses.get_field),
            ("putField", &clauses.put_field),
        ] {
            if let Some(list) = list {
                names.push(name.to_string());
                fields.push(self.level(None, list)?.into());
            }
        }
        let structure = self.factory.create_structure(None, names, fields)?;

        let mut tree = PVStructure::new(structure);
        if let Some(options) = &clauses.record {
            fill(child_structure(&mut tree, "record"), Some(options.as_slice()), &[]);
        }
        for (name, list) in [
            ("field", &clauses.field),
            ("getField", &clauses.get_field),
            ("putField", &clauses.put_field),
        ] {
            if let Some(list) = list {
                fill(child_structure(&mut tree, name), None, list);
            }
        }
        Ok(SelectionTree(tree))
    }

    /// Type of one selection level: `_options` first, then one structure per child
    fn level(
        &self,
        options: Option<&[(&str, &str)]>,
        children: &[FieldSpec<'_>],
    ) -> Result<std::sync::Arc<Structure>, ParseError> {
        let mut names = Vec::new();
        let mut fields: Vec<Field> = Vec::new();
        if let Some(options) = options {
            let (keys, strings): (Vec<String>, Vec<Field>) = options
                .iter()
                .map(|(key, _)| (key.to_string(), Field::Scalar(ScalarType::String)))
                .unzip();
            names.push(OPTIONS.to_string());
            fields.push(self.factory.create_structure(None, keys, strings)?.into());
        }
        for child in children {
            names.push(child.name.to_string());
            fields.push(self.level(child.options.as_deref(), child.children())?.into());
        }
        Ok(self.factory.create_structure(None, names, fields)?)
    }
}

fn child_structure<'p>(parent: &'p mut PVStructure, name: &str) -> &'p mut PVStructure {
    match parent.child_mut(name) {
        Some(PVField::Structure(child)) => child,
        _ => panic!("Selection schema has no structure '{name}'"),
    }
}

/// Write option strings into a structure built by [`RequestParser::level`]
fn fill(pv: &mut PVStructure, options: Option<&[(&str, &str)]>, children: &[FieldSpec<'_>]) {
    if let Some(options) = options.filter(|o| !o.is_empty()) {
        let target = child_structure(pv, OPTIONS);
        for (key, value) in options {
            if let Err(e) = target.put_string(key, value) {
                panic!("Selection schema does not match options: {e}");
            }
        }
    }
    for child in children {
        fill(
            child_structure(pv, child.name),
            child.options.as_deref(),
            child.children(),
        );
    }
}

/// Parse a request with the standard field factory
pub fn create_request(request: &str) -> Result<SelectionTree, ParseError> {
    RequestParser::new().parse(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_split() {
        let items: Vec<_> = split_top_level("a,b{c,d},e[x=1,y=2].f")
            .into_iter()
            .map(|(_, item)| item)
            .collect();
        assert_eq!(items, ["a", "b{c,d}", "e[x=1,y=2].f"]);
        assert_eq!(split_top_level("a,,b")[1], (2, ""));
    }

    #[test]
    fn closing_matches_nesting() {
        assert_eq!(closing("a{b{c}d}e", 1), Some(7));
        assert_eq!(closing("field(a[x=y]{b})", 5), Some(15));
        assert_eq!(closing("{{}", 0), None);
    }

    #[test]
    fn implicit_field_clause() {
        let tree = create_request("alarm, timeStamp, power.value").unwrap();
        assert_eq!(tree.structure().names(), ["field"]);
        let field = tree.field().unwrap();
        assert_eq!(field.structure().names(), ["alarm", "timeStamp", "power"]);
        assert!(field.sub_structure("power.value").unwrap().is_empty());
    }

    #[test]
    fn options_come_first() {
        let tree = create_request("field(a[x=1]{b,c})").unwrap();
        let a = tree.pv_structure().sub_structure("field.a").unwrap();
        assert_eq!(a.structure().names(), [OPTIONS, "b", "c"]);
        assert_eq!(tree.get_option("field.a", "x"), Some("1"));
    }

    #[test]
    fn error_positions() {
        assert!(matches!(
            create_request("field(a,,b)"),
            Err(ParseError::EmptyFieldName { position: 8, .. })
        ));
        assert!(matches!(
            create_request("field(a{})"),
            Err(ParseError::EmptyBraces { position: 7, .. })
        ));
        assert!(matches!(
            create_request("field(a[x=y]b)"),
            Err(ParseError::Unexpected { position: 12, .. })
        ));
        assert!(matches!(
            create_request("field(a[])"),
            Err(ParseError::EmptyOptions { .. })
        ));
        assert!(matches!(
            create_request("field(a)field(b)"),
            Err(ParseError::DuplicateClause { .. })
        ));
    }
}
