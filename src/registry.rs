// ABOUTME: Adapter over the RCT object dictionary: object id <-> name, unit, wire data type
// ABOUTME: The real dictionary lives in the device/vendor tooling; this is a small built-in table plus a pluggable trait

use std::collections::HashMap;

/// Wire encoding of a response payload. Mirrors the handful of primitive
/// shapes the device actually sends; `Unknown` payloads are left as raw
/// bytes by `codec::decode_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Unknown,
    Bool,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Enum,
    Float,
    String,
}

/// Metadata for one object id: its human name, unit (if any), and how to
/// decode its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub oid: u32,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub response_data_type: DataType,
}

/// A lookup table mapping object ids to their [`ObjectInfo`], in both
/// directions. [`StaticRegistry`] is a built-in table seeded with the
/// parameters this client's `driver` module polls by default; callers with a
/// fuller device dictionary can supply their own implementation.
pub trait OidRegistry {
    fn get_by_id(&self, oid: u32) -> Option<&ObjectInfo>;
    fn get_by_name(&self, name: &str) -> Option<&ObjectInfo>;
    fn all(&self) -> Box<dyn Iterator<Item = &ObjectInfo> + '_>;
}

macro_rules! entry {
    ($oid:expr, $name:expr, $unit:expr, $ty:ident) => {
        ObjectInfo {
            oid: $oid,
            name: $name,
            unit: $unit,
            response_data_type: DataType::$ty,
        }
    };
}

/// Built-in registry covering the short- and long-interval readings this
/// client polls by default. Object ids here are synthetic, stable
/// placeholders for the named parameters below (the real per-device id is
/// computed by vendor tooling this crate does not have access to); callers
/// talking to a specific device should supply their own [`OidRegistry`].
pub struct StaticRegistry {
    by_id: HashMap<u32, usize>,
    by_name: HashMap<&'static str, usize>,
    entries: Vec<ObjectInfo>,
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticRegistry {
    pub fn new() -> Self {
        let entries = vec![
            // Short-interval readings.
            entry!(0x0001_0000, "dc_conv.dc_conv_struct[0].p_dc", Some("W"), Float),
            entry!(0x0001_0001, "dc_conv.dc_conv_struct[1].p_dc", Some("W"), Float),
            entry!(0x0001_0002, "g_sync.p_ac_load_sum_lp", Some("W"), Float),
            entry!(0x0001_0003, "g_sync.p_ac_grid_sum_lp", Some("W"), Float),
            entry!(0x0001_0004, "g_sync.p_ac_load[0]", Some("W"), Float),
            entry!(0x0001_0005, "g_sync.p_ac_load[1]", Some("W"), Float),
            entry!(0x0001_0006, "g_sync.p_ac_load[2]", Some("W"), Float),
            entry!(0x0001_0007, "g_sync.p_acc_lp", Some("W"), Float),
            entry!(0x0001_0008, "grid_pll[0].f", Some("Hz"), Float),
            // Long-interval readings.
            entry!(0x0002_0000, "battery.soc", Some("%"), Float),
            entry!(0x0002_0001, "battery.soc_target", Some("%"), Float),
            entry!(0x0002_0002, "power_mng.amp_hours", Some("Ah"), Float),
            entry!(0x0002_0003, "battery.voltage", Some("V"), Float),
            entry!(0x0002_0004, "battery.used_energy", Some("Wh"), Float),
            entry!(0x0002_0005, "battery.stored_energy", Some("Wh"), Float),
            entry!(0x0002_0006, "prim_sm.island_flag", None, Bool),
            entry!(0x0002_0007, "energy.e_ac_day", Some("Wh"), Float),
            entry!(0x0002_0008, "energy.e_load_day", Some("Wh"), Float),
            entry!(0x0002_0009, "energy.e_ac_total", Some("Wh"), Float),
            entry!(0x0002_000A, "energy.e_grid_feed_day_sum", Some("Wh"), Float),
            entry!(0x0002_000B, "energy.e_grid_load_day", Some("Wh"), Float),
            entry!(0x0002_000C, "energy.e_dc_day[0]", Some("Wh"), Float),
            entry!(0x0002_000D, "energy.e_dc_day[1]", Some("Wh"), Float),
        ];

        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_name = HashMap::with_capacity(entries.len());
        for (idx, e) in entries.iter().enumerate() {
            by_id.insert(e.oid, idx);
            by_name.insert(e.name, idx);
        }

        StaticRegistry { by_id, by_name, entries }
    }
}

impl OidRegistry for StaticRegistry {
    fn get_by_id(&self, oid: u32) -> Option<&ObjectInfo> {
        self.by_id.get(&oid).map(|&idx| &self.entries[idx])
    }

    fn get_by_name(&self, name: &str) -> Option<&ObjectInfo> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    fn all(&self) -> Box<dyn Iterator<Item = &ObjectInfo> + '_> {
        Box::new(self.entries.iter())
    }
}
