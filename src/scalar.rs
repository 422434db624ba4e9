//! Scalar types and values of the pvData type system.
//!
//! pvData knows twelve scalar types, listed in [`ScalarType`]. A single value of
//! one of them is held in a [`ScalarValue`], an array in a [`ScalarArrayValue`].
//! Unlike Channel Access, unsigned integer types exist natively.
//!
//! Only a narrow slice of the conversion matrix is provided: numeric values can
//! be read and written through `f64`, and arrays converted between numeric
//! element types, whenever the value is representable in the target type.

use std::{fmt, str::FromStr};

use num::{NumCast, ToPrimitive};
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    UByte,
    UShort,
    UInt,
    ULong,
    Float,
    Double,
    String,
}

impl ScalarType {
    /// The type name as used in introspection dumps
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Boolean => "boolean",
            ScalarType::Byte => "byte",
            ScalarType::Short => "short",
            ScalarType::Int => "int",
            ScalarType::Long => "long",
            ScalarType::UByte => "ubyte",
            ScalarType::UShort => "ushort",
            ScalarType::UInt => "uint",
            ScalarType::ULong => "ulong",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::String => "string",
        }
    }
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ScalarType::Boolean | ScalarType::String)
    }
    pub fn is_integer(&self) -> bool {
        self.is_numeric() && !matches!(self, ScalarType::Float | ScalarType::Double)
    }
    pub fn default_value(&self) -> ScalarValue {
        match self {
            ScalarType::Boolean => ScalarValue::Boolean(false),
            ScalarType::Byte => ScalarValue::Byte(0),
            ScalarType::Short => ScalarValue::Short(0),
            ScalarType::Int => ScalarValue::Int(0),
            ScalarType::Long => ScalarValue::Long(0),
            ScalarType::UByte => ScalarValue::UByte(0),
            ScalarType::UShort => ScalarValue::UShort(0),
            ScalarType::UInt => ScalarValue::UInt(0),
            ScalarType::ULong => ScalarValue::ULong(0),
            ScalarType::Float => ScalarValue::Float(0.0),
            ScalarType::Double => ScalarValue::Double(0.0),
            ScalarType::String => ScalarValue::String(String::new()),
        }
    }
    pub fn empty_array(&self) -> ScalarArrayValue {
        match self {
            ScalarType::Boolean => ScalarArrayValue::Boolean(Vec::new()),
            ScalarType::Byte => ScalarArrayValue::Byte(Vec::new()),
            ScalarType::Short => ScalarArrayValue::Short(Vec::new()),
            ScalarType::Int => ScalarArrayValue::Int(Vec::new()),
            ScalarType::Long => ScalarArrayValue::Long(Vec::new()),
            ScalarType::UByte => ScalarArrayValue::UByte(Vec::new()),
            ScalarType::UShort => ScalarArrayValue::UShort(Vec::new()),
            ScalarType::UInt => ScalarArrayValue::UInt(Vec::new()),
            ScalarType::ULong => ScalarArrayValue::ULong(Vec::new()),
            ScalarType::Float => ScalarArrayValue::Float(Vec::new()),
            ScalarType::Double => ScalarArrayValue::Double(Vec::new()),
            ScalarType::String => ScalarArrayValue::String(Vec::new()),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown scalar type name: {0}")]
pub struct UnknownScalarType(pub String);

impl FromStr for ScalarType {
    type Err = UnknownScalarType;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "boolean" => ScalarType::Boolean,
            "byte" => ScalarType::Byte,
            "short" => ScalarType::Short,
            "int" => ScalarType::Int,
            "long" => ScalarType::Long,
            "ubyte" => ScalarType::UByte,
            "ushort" => ScalarType::UShort,
            "uint" => ScalarType::UInt,
            "ulong" => ScalarType::ULong,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            "string" => ScalarType::String,
            _ => return Err(UnknownScalarType(s.to_string())),
        })
    }
}

/// Errors from reading or writing values through the conversion helpers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("Value {value} is not representable as {target}")]
    NotRepresentable { value: f64, target: ScalarType },
    #[error("Cannot convert {from} to {to}")]
    NoConvert { from: ScalarType, to: ScalarType },
    #[error("Field is not a {0}")]
    WrongKind(&'static str),
    #[error("No field named '{0}'")]
    NoSuchField(String),
}

/// A single scalar value
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarValue::Boolean(_) => ScalarType::Boolean,
            ScalarValue::Byte(_) => ScalarType::Byte,
            ScalarValue::Short(_) => ScalarType::Short,
            ScalarValue::Int(_) => ScalarType::Int,
            ScalarValue::Long(_) => ScalarType::Long,
            ScalarValue::UByte(_) => ScalarType::UByte,
            ScalarValue::UShort(_) => ScalarType::UShort,
            ScalarValue::UInt(_) => ScalarType::UInt,
            ScalarValue::ULong(_) => ScalarType::ULong,
            ScalarValue::Float(_) => ScalarType::Float,
            ScalarValue::Double(_) => ScalarType::Double,
            ScalarValue::String(_) => ScalarType::String,
        }
    }

    /// Read the value as a double.
    ///
    /// Booleans read as 0 or 1, strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            ScalarValue::Byte(v) => NumCast::from(*v),
            ScalarValue::Short(v) => NumCast::from(*v),
            ScalarValue::Int(v) => NumCast::from(*v),
            ScalarValue::Long(v) => NumCast::from(*v),
            ScalarValue::UByte(v) => NumCast::from(*v),
            ScalarValue::UShort(v) => NumCast::from(*v),
            ScalarValue::UInt(v) => NumCast::from(*v),
            ScalarValue::ULong(v) => NumCast::from(*v),
            ScalarValue::Float(v) => NumCast::from(*v),
            ScalarValue::Double(v) => Some(*v),
            ScalarValue::String(v) => v.parse().ok(),
        }
    }

    /// Write a double into the value, keeping the value's own type
    pub fn put_f64(&mut self, value: f64) -> Result<(), ValueError> {
        fn _cast<T: NumCast>(value: f64, target: ScalarType) -> Result<T, ValueError> {
            NumCast::from(value).ok_or(ValueError::NotRepresentable { value, target })
        }
        let target = self.scalar_type();
        match self {
            ScalarValue::Boolean(v) => *v = value != 0.0,
            ScalarValue::Byte(v) => *v = _cast(value, target)?,
            ScalarValue::Short(v) => *v = _cast(value, target)?,
            ScalarValue::Int(v) => *v = _cast(value, target)?,
            ScalarValue::Long(v) => *v = _cast(value, target)?,
            ScalarValue::UByte(v) => *v = _cast(value, target)?,
            ScalarValue::UShort(v) => *v = _cast(value, target)?,
            ScalarValue::UInt(v) => *v = _cast(value, target)?,
            ScalarValue::ULong(v) => *v = _cast(value, target)?,
            ScalarValue::Float(v) => *v = _cast(value, target)?,
            ScalarValue::Double(v) => *v = value,
            ScalarValue::String(v) => *v = value.to_string(),
        }
        Ok(())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Byte(v) => write!(f, "{v}"),
            ScalarValue::Short(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Long(v) => write!(f, "{v}"),
            ScalarValue::UByte(v) => write!(f, "{v}"),
            ScalarValue::UShort(v) => write!(f, "{v}"),
            ScalarValue::UInt(v) => write!(f, "{v}"),
            ScalarValue::ULong(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Double(v) => write!(f, "{v}"),
            ScalarValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// An array of scalar values, all of one type
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarArrayValue {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    UByte(Vec<u8>),
    UShort(Vec<u16>),
    UInt(Vec<u32>),
    ULong(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl ScalarArrayValue {
    pub fn element_type(&self) -> ScalarType {
        match self {
            ScalarArrayValue::Boolean(_) => ScalarType::Boolean,
            ScalarArrayValue::Byte(_) => ScalarType::Byte,
            ScalarArrayValue::Short(_) => ScalarType::Short,
            ScalarArrayValue::Int(_) => ScalarType::Int,
            ScalarArrayValue::Long(_) => ScalarType::Long,
            ScalarArrayValue::UByte(_) => ScalarType::UByte,
            ScalarArrayValue::UShort(_) => ScalarType::UShort,
            ScalarArrayValue::UInt(_) => ScalarType::UInt,
            ScalarArrayValue::ULong(_) => ScalarType::ULong,
            ScalarArrayValue::Float(_) => ScalarType::Float,
            ScalarArrayValue::Double(_) => ScalarType::Double,
            ScalarArrayValue::String(_) => ScalarType::String,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            ScalarArrayValue::Boolean(v) => v.len(),
            ScalarArrayValue::Byte(v) => v.len(),
            ScalarArrayValue::Short(v) => v.len(),
            ScalarArrayValue::Int(v) => v.len(),
            ScalarArrayValue::Long(v) => v.len(),
            ScalarArrayValue::UByte(v) => v.len(),
            ScalarArrayValue::UShort(v) => v.len(),
            ScalarArrayValue::UInt(v) => v.len(),
            ScalarArrayValue::ULong(v) => v.len(),
            ScalarArrayValue::Float(v) => v.len(),
            ScalarArrayValue::Double(v) => v.len(),
            ScalarArrayValue::String(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert a numeric array to another numeric element type.
    ///
    /// Fails if any element can't be represented in the target type. Boolean
    /// and string arrays only convert to themselves.
    pub fn convert_to(&self, target: ScalarType) -> Result<ScalarArrayValue, ValueError> {
        /// Utility function so that we don't have to repeat the map iter conversion
        fn _try_convert_vec<T, U>(from: &[T], target: ScalarType) -> Result<Vec<U>, ValueError>
        where
            T: Copy + NumCast,
            U: NumCast,
        {
            from.iter()
                .map(|n| {
                    NumCast::from(*n).ok_or_else(|| ValueError::NotRepresentable {
                        value: n.to_f64().unwrap_or(f64::NAN),
                        target,
                    })
                })
                .collect()
        }
        let source = self.element_type();
        macro_rules! convert_numeric {
            ($from:expr) => {
                match target {
                    ScalarType::Byte => ScalarArrayValue::Byte(_try_convert_vec($from, target)?),
                    ScalarType::Short => ScalarArrayValue::Short(_try_convert_vec($from, target)?),
                    ScalarType::Int => ScalarArrayValue::Int(_try_convert_vec($from, target)?),
                    ScalarType::Long => ScalarArrayValue::Long(_try_convert_vec($from, target)?),
                    ScalarType::UByte => ScalarArrayValue::UByte(_try_convert_vec($from, target)?),
                    ScalarType::UShort => {
                        ScalarArrayValue::UShort(_try_convert_vec($from, target)?)
                    }
                    ScalarType::UInt => ScalarArrayValue::UInt(_try_convert_vec($from, target)?),
                    ScalarType::ULong => ScalarArrayValue::ULong(_try_convert_vec($from, target)?),
                    ScalarType::Float => ScalarArrayValue::Float(_try_convert_vec($from, target)?),
                    ScalarType::Double => {
                        ScalarArrayValue::Double(_try_convert_vec($from, target)?)
                    }
                    ScalarType::Boolean | ScalarType::String => {
                        return Err(ValueError::NoConvert {
                            from: source,
                            to: target,
                        });
                    }
                }
            };
        }

        if target == source {
            return Ok(self.clone());
        }
        Ok(match self {
            ScalarArrayValue::Byte(v) => convert_numeric!(v),
            ScalarArrayValue::Short(v) => convert_numeric!(v),
            ScalarArrayValue::Int(v) => convert_numeric!(v),
            ScalarArrayValue::Long(v) => convert_numeric!(v),
            ScalarArrayValue::UByte(v) => convert_numeric!(v),
            ScalarArrayValue::UShort(v) => convert_numeric!(v),
            ScalarArrayValue::UInt(v) => convert_numeric!(v),
            ScalarArrayValue::ULong(v) => convert_numeric!(v),
            ScalarArrayValue::Float(v) => convert_numeric!(v),
            ScalarArrayValue::Double(v) => convert_numeric!(v),
            ScalarArrayValue::Boolean(_) | ScalarArrayValue::String(_) => {
                return Err(ValueError::NoConvert {
                    from: source,
                    to: target,
                });
            }
        })
    }
}

impl fmt::Display for ScalarArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn _join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{v}")?;
            }
            write!(f, "]")
        }
        match self {
            ScalarArrayValue::Boolean(v) => _join(f, v),
            ScalarArrayValue::Byte(v) => _join(f, v),
            ScalarArrayValue::Short(v) => _join(f, v),
            ScalarArrayValue::Int(v) => _join(f, v),
            ScalarArrayValue::Long(v) => _join(f, v),
            ScalarArrayValue::UByte(v) => _join(f, v),
            ScalarArrayValue::UShort(v) => _join(f, v),
            ScalarArrayValue::UInt(v) => _join(f, v),
            ScalarArrayValue::ULong(v) => _join(f, v),
            ScalarArrayValue::Float(v) => _join(f, v),
            ScalarArrayValue::Double(v) => _join(f, v),
            ScalarArrayValue::String(v) => _join(f, v),
        }
    }
}

/// Implement From/TryFrom between a native type and its scalar and array variants
macro_rules! impl_scalar_conversions_between {
    ($variant:ident, $typ:ty) => {
        impl From<$typ> for ScalarValue {
            fn from(value: $typ) -> Self {
                ScalarValue::$variant(value)
            }
        }
        impl From<Vec<$typ>> for ScalarArrayValue {
            fn from(value: Vec<$typ>) -> Self {
                ScalarArrayValue::$variant(value)
            }
        }
        impl TryFrom<&ScalarArrayValue> for Vec<$typ> {
            type Error = ValueError;
            fn try_from(value: &ScalarArrayValue) -> Result<Self, Self::Error> {
                Ok(match value.convert_to(ScalarType::$variant)? {
                    ScalarArrayValue::$variant(v) => v,
                    _ => unreachable!(),
                })
            }
        }
    };
}
impl_scalar_conversions_between!(Boolean, bool);
impl_scalar_conversions_between!(Byte, i8);
impl_scalar_conversions_between!(Short, i16);
impl_scalar_conversions_between!(Int, i32);
impl_scalar_conversions_between!(Long, i64);
impl_scalar_conversions_between!(UByte, u8);
impl_scalar_conversions_between!(UShort, u16);
impl_scalar_conversions_between!(UInt, u32);
impl_scalar_conversions_between!(ULong, u64);
impl_scalar_conversions_between!(Float, f32);
impl_scalar_conversions_between!(Double, f64);
impl_scalar_conversions_between!(String, String);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}
