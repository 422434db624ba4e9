//! Commonly used structure types: alarm, timeStamp, display, control, and the
//! normative scalar types built from them.

use std::sync::Arc;

use tracing::debug;

use crate::{
    introspect::{Field, FieldBuilder, FieldCreate, FieldFactory, IntrospectError, Structure},
    scalar::ScalarType,
};

pub const NT_SCALAR_ID: &str = "epics:nt/NTScalar:1.0";
pub const NT_SCALAR_ARRAY_ID: &str = "epics:nt/NTScalarArray:1.0";

/// Builds standard structures through a chosen factory
#[derive(Clone, Copy)]
pub struct StandardField<'a> {
    factory: &'a dyn FieldFactory,
}

impl Default for StandardField<'static> {
    fn default() -> Self {
        StandardField { factory: &FieldCreate }
    }
}

impl<'a> StandardField<'a> {
    pub fn new(factory: &'a dyn FieldFactory) -> Self {
        StandardField { factory }
    }

    fn builder(&self) -> FieldBuilder<'a> {
        FieldBuilder::with_factory(self.factory)
    }

    pub fn alarm(&self) -> Result<Arc<Structure>, IntrospectError> {
        self.builder()
            .id("alarm_t")
            .add_scalar("severity", ScalarType::Int)
            .add_scalar("status", ScalarType::Int)
            .add_scalar("message", ScalarType::String)
            .create_structure()
    }

    pub fn time_stamp(&self) -> Result<Arc<Structure>, IntrospectError> {
        self.builder()
            .id("time_t")
            .add_scalar("secondsPastEpoch", ScalarType::Long)
            .add_scalar("nanoseconds", ScalarType::Int)
            .add_scalar("userTag", ScalarType::Int)
            .create_structure()
    }

    pub fn display(&self) -> Result<Arc<Structure>, IntrospectError> {
        self.builder()
            .id("display_t")
            .add_scalar("limitLow", ScalarType::Double)
            .add_scalar("limitHigh", ScalarType::Double)
            .add_scalar("description", ScalarType::String)
            .add_scalar("format", ScalarType::String)
            .add_scalar("units", ScalarType::String)
            .create_structure()
    }

    pub fn control(&self) -> Result<Arc<Structure>, IntrospectError> {
        self.builder()
            .id("control_t")
            .add_scalar("limitLow", ScalarType::Double)
            .add_scalar("limitHigh", ScalarType::Double)
            .add_scalar("minStep", ScalarType::Double)
            .create_structure()
    }

    /// An NTScalar with a `value` of the given type and the named properties.
    ///
    /// `properties` is a comma separated list drawn from `alarm`, `timeStamp`,
    /// `display` and `control`. Unknown names are skipped.
    pub fn scalar(
        &self,
        value_type: ScalarType,
        properties: &str,
    ) -> Result<Arc<Structure>, IntrospectError> {
        self.with_properties(NT_SCALAR_ID, Field::Scalar(value_type), properties)
    }

    /// As [`StandardField::scalar`], with an array `value`
    pub fn scalar_array(
        &self,
        element_type: ScalarType,
        properties: &str,
    ) -> Result<Arc<Structure>, IntrospectError> {
        self.with_properties(NT_SCALAR_ARRAY_ID, Field::ScalarArray(element_type), properties)
    }

    fn with_properties(
        &self,
        id: &str,
        value: Field,
        properties: &str,
    ) -> Result<Arc<Structure>, IntrospectError> {
        let mut builder = self.builder().id(id).add("value", value);
        for property in properties.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let field = match property {
                "alarm" => self.alarm()?,
                "timeStamp" => self.time_stamp()?,
                "display" => self.display()?,
                "control" => self.control()?,
                other => {
                    debug!("Skipping unknown standard property '{other}'");
                    continue;
                }
            };
            builder = builder.add(property, field.into());
        }
        builder.create_structure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nt_scalar_layout() {
        let s = StandardField::default()
            .scalar(ScalarType::Double, "alarm,timeStamp")
            .unwrap();
        assert_eq!(s.id(), NT_SCALAR_ID);
        assert_eq!(s.names(), ["value", "alarm", "timeStamp"]);
        // root, value, alarm{3}, timeStamp{3}
        assert_eq!(s.number_fields(), 10);
        assert_eq!(s.offset_of("timeStamp.userTag"), Some(9));
        assert_eq!(s.field("alarm").map(Field::id).as_deref(), Some("alarm_t"));
    }

    #[test]
    fn unknown_properties_skipped() {
        let s = StandardField::default()
            .scalar_array(ScalarType::Int, "display, bogus ,control")
            .unwrap();
        assert_eq!(s.names(), ["value", "display", "control"]);
        assert_eq!(s.id(), NT_SCALAR_ARRAY_ID);
    }
}
