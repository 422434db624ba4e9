use std::sync::{Arc, Mutex};

use pvcopy::{
    BitSet, CopyBuilder, CopyError, PVCopy, PVField, PVFilter, PVPlugin, PVStructure,
    PluginRegistry, create_request,
    introspect::{Field, FieldBuilder, Structure},
    plugin::FilterTarget,
    pvdata::PVStructureArray,
    scalar::ScalarType,
    standard::StandardField,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::TestWriter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(TestWriter::new())
        .try_init();
}

fn engine(master: &PVStructure, request: &str) -> PVCopy {
    let tree = create_request(request).unwrap();
    PVCopy::build(master, tree.pv_structure(), None).unwrap()
}

fn nt_scalar() -> PVStructure {
    PVStructure::new(
        StandardField::default()
            .scalar(ScalarType::Double, "alarm,timeStamp")
            .unwrap(),
    )
}

/// 0 root
/// 1 alarm{2 severity, 3 status, 4 message}
/// 5 timeStamp{6 secondsPastEpoch, 7 nanoseconds, 8 userTag}
/// 9 power{10 value, 11 alarm{12, 13, 14}}
/// 15 voltage{16 value, 17 alarm{18, 19, 20}}
/// 21 current{22 value, 23 alarm{24, 25, 26}}
fn power_supply() -> PVStructure {
    let standard = StandardField::default();
    let alarm = standard.alarm().unwrap();
    let channel = FieldBuilder::new()
        .add_scalar("value", ScalarType::Double)
        .add("alarm", alarm.clone().into())
        .create_structure()
        .unwrap();
    let structure = FieldBuilder::new()
        .id("powerSupply")
        .add("alarm", alarm.into())
        .add("timeStamp", standard.time_stamp().unwrap().into())
        .add("power", channel.clone().into())
        .add("voltage", channel.clone().into())
        .add("current", channel.into())
        .create_structure()
        .unwrap();
    PVStructure::new(structure)
}

/// Walk the copy scalar by scalar and check every value matches its master field
fn assert_copy_matches(engine: &PVCopy, master: &PVStructure, copy: &PVStructure) {
    for offset in 1..engine.structure().number_fields() {
        let Some(PVField::Scalar(value)) = copy.sub_field_at(offset) else {
            continue;
        };
        let master_ref = engine.master_field_at(offset);
        assert_eq!(
            master_ref.resolve(master).and_then(PVField::as_scalar),
            Some(value),
            "copy offset {offset}"
        );
    }
}

fn scalar_scenario(request: &str) {
    let mut master = nt_scalar();
    let engine = engine(&master, request);
    let value_offset = engine.copy_offset_of_path("value").unwrap();

    master.put_f64("value", 0.04).unwrap();
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);
    assert_eq!(copy.get_f64("value"), Some(0.04));
    assert!(bits.get(0));
    assert_eq!(bits.cardinality(), 1);

    master.put_f64("value", 0.06).unwrap();
    bits.clear_all();
    engine.update_copy_set_bitset(&master, &mut copy, &mut bits);
    assert_eq!(copy.get_f64("value"), Some(0.06));
    assert_eq!(bits.iter().collect::<Vec<_>>(), [value_offset]);

    bits.clear_all();
    master.put_f64("value", 1.0).unwrap();
    bits.set(0);
    engine.update_copy_from_bitset(&master, &mut copy, &mut bits);
    assert_eq!(copy.get_f64("value"), Some(1.0));

    copy.put_f64("value", 2.0).unwrap();
    bits.clear_all();
    bits.set(0);
    engine.update_master(&mut master, &copy, &mut bits);
    assert_eq!(master.get_f64("value"), Some(2.0));
    assert_copy_matches(&engine, &master, &copy);
}

#[test]
fn test_scalar_scenarios() {
    init_logging();
    for request in ["value", "", "alarm,timeStamp,value"] {
        scalar_scenario(request);
    }
}

#[test]
fn test_array_scenario() {
    init_logging();
    let mut master = PVStructure::new(
        StandardField::default()
            .scalar_array(ScalarType::Double, "alarm,timeStamp")
            .unwrap(),
    );
    let engine = engine(&master, "value,alarm");
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();

    master
        .sub_field_mut("value")
        .unwrap()
        .put_array(vec![1.0f64, 2.0, 3.0].into())
        .unwrap();
    engine.init_copy(&master, &mut copy, &mut bits);
    assert_eq!(copy.sub_field("value"), master.sub_field("value"));

    master
        .sub_field_mut("value")
        .unwrap()
        .put_array(vec![4.0f64].into())
        .unwrap();
    bits.clear_all();
    assert_eq!(engine.update_copy_set_bitset(&master, &mut copy, &mut bits), 1);
    assert_eq!(bits.iter().collect::<Vec<_>>(), [1]);
    assert_eq!(copy.sub_field("value"), master.sub_field("value"));
}

#[test]
fn test_power_supply_projections() {
    init_logging();
    let master = power_supply();

    let copy = engine(&master, "power.value");
    assert_eq!(copy.structure().names(), ["power"]);
    assert_eq!(copy.structure().number_fields(), 3);
    assert_eq!(copy.copy_offset_of_path("power.value"), Some(2));
    assert_eq!(copy.copy_offset_of_path("power.alarm"), None);

    let copy = engine(&master, "");
    assert!(Arc::ptr_eq(copy.structure(), master.structure()));

    let copy = engine(&master, "alarm,timeStamp,voltage.value,power.value,current.value");
    assert_eq!(
        copy.structure().names(),
        ["alarm", "timeStamp", "voltage", "power", "current"]
    );
    // root, alarm{3}, timeStamp{3}, and three single-value channels
    assert_eq!(copy.structure().number_fields(), 15);
    assert_eq!(copy.copy_offset_of_path("voltage.value"), Some(10));
    assert_eq!(copy.copy_offset_of_path("power.value"), Some(12));
    assert_eq!(copy.copy_offset_of_path("current.value"), Some(14));

    let copy = engine(
        &master,
        "alarm,timeStamp,voltage{value,alarm},power{value,alarm,display},current.value",
    );
    let voltage = copy.structure().field("voltage").and_then(Field::as_structure);
    assert_eq!(voltage.map(|v| v.number_fields()), Some(6));
    // display does not exist in the master and is dropped
    let power = copy.structure().field("power").and_then(Field::as_structure);
    assert_eq!(
        power.map(|p| p.names().to_vec()),
        Some(vec!["value".to_string(), "alarm".to_string()])
    );
}

#[test]
fn test_offset_law() {
    init_logging();
    let master = power_supply();
    for request in [
        "",
        "power.value",
        "alarm,timeStamp,voltage.value,power.value,current.value",
        "alarm,timeStamp,voltage{value,alarm},power{value,alarm},current.value",
        "current,voltage.alarm.severity",
    ] {
        let engine = engine(&master, request);
        let mut selected = Vec::new();
        for master_offset in 0..master.number_fields() {
            if let Some(copy_offset) = engine.copy_offset_of(master_offset) {
                assert!(copy_offset < engine.structure().number_fields());
                selected.push(copy_offset);
                assert_eq!(
                    engine.master_field_at(copy_offset).offset,
                    master_offset,
                    "request '{request}' master offset {master_offset}"
                );
            }
        }
        // Distinct master fields land on distinct copy fields
        let count = selected.len();
        selected.sort_unstable();
        selected.dedup();
        assert_eq!(selected.len(), count, "{request}");
    }
}

#[test]
fn test_directed_update_copies_only_marked() {
    init_logging();
    let mut master = power_supply();
    let engine = engine(&master, "alarm,timeStamp,voltage{value,alarm},power.value");
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);

    master.put_f64("voltage.value", 5.0).unwrap();
    master.put_f64("power.value", 7.0).unwrap();

    bits.clear_all();
    assert_eq!(engine.update_copy_from_bitset(&master, &mut copy, &mut bits), 0);
    assert_eq!(copy.get_f64("voltage.value"), Some(0.0));

    let voltage_value = engine.copy_offset_of_path("voltage.value").unwrap();
    bits.set(voltage_value);
    assert_eq!(engine.update_copy_from_bitset(&master, &mut copy, &mut bits), 1);
    assert_eq!(copy.get_f64("voltage.value"), Some(5.0));
    assert_eq!(copy.get_f64("power.value"), Some(0.0));

    // A structure bit marks everything below it
    bits.clear_all();
    bits.set(engine.copy_offset_of_path("alarm").unwrap());
    master.put_string("alarm.message", "LOW").unwrap();
    assert_eq!(engine.update_copy_from_bitset(&master, &mut copy, &mut bits), 3);
    assert_eq!(copy.get_string("alarm.message"), Some("LOW"));

    bits.clear_all();
    bits.set(0);
    engine.update_copy_from_bitset(&master, &mut copy, &mut bits);
    assert_copy_matches(&engine, &master, &copy);
}

#[test]
fn test_update_master_writes_only_marked() {
    init_logging();
    let mut master = power_supply();
    let engine = engine(&master, "alarm,power{value,alarm}");
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);

    copy.put_f64("power.value", 3.5).unwrap();
    copy.put_f64("alarm.severity", 2.0).unwrap();
    bits.clear_all();
    bits.set(engine.copy_offset_of_path("power.value").unwrap());
    assert_eq!(engine.update_master(&mut master, &copy, &mut bits), 1);
    assert_eq!(master.get_f64("power.value"), Some(3.5));
    // Not marked, so not written back
    assert_eq!(master.get_f64("alarm.severity"), Some(0.0));

    // Leaf structure with one marked member
    bits.clear_all();
    bits.set(engine.copy_offset_of_path("alarm.severity").unwrap());
    copy.put_string("alarm.message", "unmarked").unwrap();
    assert_eq!(engine.update_master(&mut master, &copy, &mut bits), 1);
    assert_eq!(master.get_f64("alarm.severity"), Some(2.0));
    assert_eq!(master.get_string("alarm.message"), Some(""));
}

#[test]
fn test_structure_array_always_marked() {
    init_logging();
    let element = FieldBuilder::new()
        .add_scalar("x", ScalarType::Int)
        .create_structure()
        .unwrap();
    let structure = FieldBuilder::new()
        .add_scalar("value", ScalarType::Int)
        .add("points", Field::StructureArray(element.clone()))
        .create_structure()
        .unwrap();
    let mut master = PVStructure::new(structure);
    if let Some(PVField::StructureArray(points)) = master.sub_field_mut("points") {
        let mut array = PVStructureArray::new(element.clone());
        array.push(Arc::new(PVStructure::new(element)));
        *points = array;
    }

    let engine = engine(&master, "value,points");
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);

    bits.clear_all();
    assert_eq!(engine.update_copy_set_bitset(&master, &mut copy, &mut bits), 0);
    assert_eq!(bits.iter().collect::<Vec<_>>(), [2]);
}

#[test]
fn test_ignore_mask() {
    init_logging();
    let mut master = power_supply();
    let engine = engine(&master, "alarm,timeStamp[ignore=true],power.value");
    // copy: 0 root, 1 alarm{2,3,4}, 5 timeStamp{6,7,8}, 9 power{10 value}
    assert_eq!(engine.ignore_mask().iter().collect::<Vec<_>>(), [5, 6, 7, 8]);

    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);

    // Only the ignored timeStamp changes: nothing is reported
    master.put_f64("timeStamp.userTag", 3.0).unwrap();
    bits.clear_all();
    assert_eq!(engine.update_copy_set_bitset(&master, &mut copy, &mut bits), 1);
    assert!(bits.is_empty());
    assert_eq!(copy.get_f64("timeStamp.userTag"), Some(3.0));

    // Together with a real change, everything is reported
    master.put_f64("timeStamp.userTag", 4.0).unwrap();
    master.put_f64("power.value", 1.0).unwrap();
    bits.clear_all();
    engine.update_copy_set_bitset(&master, &mut copy, &mut bits);
    assert_eq!(bits.iter().collect::<Vec<_>>(), [8, 10]);
}

#[test]
fn test_ignore_mask_directed_update() {
    init_logging();
    let mut master = power_supply();
    let engine = engine(&master, "alarm,timeStamp[ignore=true],power.value");
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);

    // Marking only an ignored field still copies it, but reports nothing
    master.put_f64("timeStamp.nanoseconds", 7.0).unwrap();
    bits.clear_all();
    bits.set(7);
    assert_eq!(engine.update_copy_from_bitset(&master, &mut copy, &mut bits), 1);
    assert!(bits.is_empty());
    assert_eq!(copy.get_f64("timeStamp.nanoseconds"), Some(7.0));

    master.put_f64("power.value", 2.0).unwrap();
    bits.set(7);
    bits.set(10);
    assert_eq!(engine.update_copy_from_bitset(&master, &mut copy, &mut bits), 2);
    assert_eq!(bits.iter().collect::<Vec<_>>(), [7, 10]);
}

#[test]
fn test_options_lookup() {
    init_logging();
    let master = power_supply();
    let tree = create_request(
        "field(alarm[a=1],power[b=2]{value[c=3],alarm})",
    )
    .unwrap();
    let engine = PVCopy::build(&master, tree.pv_structure(), None).unwrap();
    // copy: 0 root, 1 alarm{2,3,4}, 5 power{6 value, 7 alarm{8,9,10}}
    let option = |offset: usize, key: &str| {
        engine
            .get_options(offset)
            .and_then(|o| o.get_string(key))
            .map(str::to_string)
    };
    assert!(engine.get_options(0).is_none());
    assert_eq!(option(1, "a").as_deref(), Some("1"));
    assert!(engine.get_options(3).is_none());
    assert_eq!(option(5, "b").as_deref(), Some("2"));
    assert_eq!(option(6, "c").as_deref(), Some("3"));
    assert!(engine.get_options(9).is_none());
}

#[test]
#[should_panic]
fn test_options_out_of_range() {
    let master = nt_scalar();
    let engine = engine(&master, "value");
    let _ = engine.get_options(2);
}

#[test]
#[should_panic(expected = "beyond copy")]
fn test_directed_update_bits_out_of_range() {
    let master = nt_scalar();
    let engine = engine(&master, "value");
    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    bits.set(500);
    engine.update_copy_from_bitset(&master, &mut copy, &mut bits);
}

#[test]
#[should_panic(expected = "beyond copy")]
fn test_update_master_bits_out_of_range() {
    let mut master = nt_scalar();
    let engine = engine(&master, "value");
    let copy = engine.create_copy();
    let mut bits = BitSet::new();
    bits.set(2);
    engine.update_master(&mut master, &copy, &mut bits);
}

#[test]
fn test_build_errors() {
    init_logging();
    let master = power_supply();
    let tree = create_request("field(nothing,missing.value)").unwrap();
    assert_eq!(
        PVCopy::build(&master, tree.pv_structure(), None).unwrap_err(),
        CopyError::EmptySelection
    );
    let tree = create_request("putField(power.value)").unwrap();
    assert_eq!(
        PVCopy::build(&master, tree.pv_structure(), Some("getField")).unwrap_err(),
        CopyError::MissingStructure("getField".to_string())
    );
    let engine = PVCopy::build(&master, tree.pv_structure(), Some("putField")).unwrap();
    assert_eq!(engine.structure().number_fields(), 3);
}

#[test]
fn test_traverse_master() {
    init_logging();
    let master = power_supply();
    let engine = engine(&master, "current.value,alarm,voltage{value}");
    let mut seen = Vec::new();
    engine.traverse_master(|field| seen.push(field.offset));
    assert_eq!(seen, [22, 1, 16]);
}

/// Copies a value only when it moved by more than a fixed amount
struct Deadband {
    master_offset: usize,
    delta: f64,
    calls: Mutex<usize>,
}

impl PVFilter for Deadband {
    fn filter(&self, target: FilterTarget<'_>, copy_offset: usize, bits: &mut BitSet) -> bool {
        *self.calls.lock().unwrap() += 1;
        let FilterTarget::ToCopy { master, copy } = target else {
            return false;
        };
        let current = master
            .sub_field_at(self.master_offset)
            .and_then(PVField::as_scalar)
            .and_then(|v| v.as_f64());
        let Some(PVField::Scalar(last)) = copy.sub_field_at_mut(copy_offset) else {
            return false;
        };
        if let (Some(current), Some(previous)) = (current, last.as_f64()) {
            if (current - previous).abs() > self.delta {
                last.put_f64(current).unwrap();
                bits.set(copy_offset);
            } else {
                bits.clear(copy_offset);
            }
        }
        true
    }
    fn name(&self) -> &str {
        "deadband"
    }
}

struct DeadbandPlugin {
    created: Mutex<Vec<Arc<Deadband>>>,
}

impl PVPlugin for DeadbandPlugin {
    fn create(
        &self,
        request_value: &str,
        _copy: &Structure,
        master: &Structure,
        master_offset: usize,
    ) -> Option<Arc<dyn PVFilter>> {
        let delta = request_value.strip_prefix("abs:")?.parse().ok()?;
        if !matches!(master.field_at(master_offset), Some(Field::Scalar(_))) {
            return None;
        }
        let filter = Arc::new(Deadband {
            master_offset,
            delta,
            calls: Mutex::new(0),
        });
        self.created.lock().unwrap().push(filter.clone());
        Some(filter)
    }
}

#[test]
fn test_filter_plugin() {
    init_logging();
    let plugin = Arc::new(DeadbandPlugin {
        created: Mutex::new(Vec::new()),
    });
    let mut registry = PluginRegistry::new();
    registry.register("deadband", plugin.clone());

    let mut master = power_supply();
    let tree = create_request("field(power.value[deadband=abs:0.5],alarm[deadband=abs:1])").unwrap();
    let engine = CopyBuilder::new(&master, tree.pv_structure())
        .plugins(&registry)
        .build()
        .unwrap();
    // Only the scalar accepted a filter
    assert_eq!(plugin.created.lock().unwrap().len(), 1);
    let value_offset = engine.copy_offset_of_path("power.value").unwrap();

    let mut copy = engine.create_copy();
    let mut bits = BitSet::new();
    engine.init_copy(&master, &mut copy, &mut bits);

    master.put_f64("power.value", 0.3).unwrap();
    bits.clear_all();
    assert_eq!(engine.update_copy_set_bitset(&master, &mut copy, &mut bits), 0);
    assert!(!bits.get(value_offset));
    assert_eq!(copy.get_f64("power.value"), Some(0.0));

    master.put_f64("power.value", 0.8).unwrap();
    engine.update_copy_set_bitset(&master, &mut copy, &mut bits);
    assert!(bits.get(value_offset));
    assert_eq!(copy.get_f64("power.value"), Some(0.8));

    // Filters are not consulted for unmarked subtrees
    let calls = *plugin.created.lock().unwrap()[0].calls.lock().unwrap();
    bits.clear_all();
    engine.update_copy_from_bitset(&master, &mut copy, &mut bits);
    assert_eq!(
        *plugin.created.lock().unwrap()[0].calls.lock().unwrap(),
        calls
    );
}
