//! Units shipped with the host: basic utilities plus fault-injection
//! diagnostics used to exercise the isolation contract.

use crate::descriptor::{ParamInfo, PluginDescriptor};
use crate::host::{NativeUnit, NativeUnitRegistry, UnitIo};

pub const GAIN_ID: &str = "ostinato.gain";
pub const PASSTHROUGH_ID: &str = "ostinato.passthrough";
pub const STALL_ID: &str = "ostinato.diag.stall";
pub const PANIC_ID: &str = "ostinato.diag.panic";

/// Catalog descriptors for the built-in units.
pub fn builtin_descriptors() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new(GAIN_ID, "Gain")
            .category("utility")
            .param(ParamInfo {
                id: 0,
                name: "gain".into(),
                min: 0.0,
                max: 2.0,
                default: 1.0,
            }),
        PluginDescriptor::new(PASSTHROUGH_ID, "Passthrough").category("utility"),
        PluginDescriptor::new(STALL_ID, "Stall (diagnostic)").category("diagnostic"),
        PluginDescriptor::new(PANIC_ID, "Panic (diagnostic)").category("diagnostic"),
    ]
}

pub(crate) fn register_builtins(registry: &NativeUnitRegistry) {
    registry.register(GAIN_ID, |_| Ok(Box::new(GainUnit::default()) as _));
    registry.register(PASSTHROUGH_ID, |_| Ok(Box::new(PassthroughUnit) as _));
    registry.register(STALL_ID, |_| Ok(Box::new(StallUnit::default()) as _));
    registry.register(PANIC_ID, |_| Ok(Box::new(PanicUnit) as _));
}

/// Applies parameter 0 as a linear gain.
#[derive(Default)]
pub struct GainUnit;

impl NativeUnit for GainUnit {
    fn process(&mut self, io: &mut UnitIo<'_>) {
        let gain = io.params.first().copied().unwrap_or(1.0);
        let n = io.n_samples;
        for i in 0..n.min(io.out_l.len()).min(io.in_l.len()) {
            io.out_l[i] = io.in_l[i] * gain;
        }
        for i in 0..n.min(io.out_r.len()).min(io.in_r.len()) {
            io.out_r[i] = io.in_r[i] * gain;
        }
    }
}

/// Copies input to output unchanged.
pub struct PassthroughUnit;

impl NativeUnit for PassthroughUnit {
    fn process(&mut self, io: &mut UnitIo<'_>) {
        let n = io.n_samples;
        let l = n.min(io.out_l.len()).min(io.in_l.len());
        io.out_l[..l].copy_from_slice(&io.in_l[..l]);
        let r = n.min(io.out_r.len()).min(io.in_r.len());
        io.out_r[..r].copy_from_slice(&io.in_r[..r]);
    }
}

/// Diagnostic unit that blocks inside `process` far past any block deadline.
/// Exists to test the bridged host's timeout latch.
pub struct StallUnit {
    pub stall: std::time::Duration,
}

impl Default for StallUnit {
    fn default() -> Self {
        Self {
            stall: std::time::Duration::from_secs(5),
        }
    }
}

impl NativeUnit for StallUnit {
    fn process(&mut self, _io: &mut UnitIo<'_>) {
        std::thread::sleep(self.stall);
    }
}

/// Diagnostic unit that panics inside `process`. Exists to test per-node
/// fault isolation.
pub struct PanicUnit;

impl NativeUnit for PanicUnit {
    fn process(&mut self, _io: &mut UnitIo<'_>) {
        panic!("diagnostic panic unit fired");
    }
}
