//! Restart persistence for the scalar step-control state and the surviving
//! breakpoint set.
//!
//! Two encodings are kept, matching the two the reference implementation
//! ships: a packed binary form (fixed field order, suitable for an
//! MPI-pack-style byte buffer) and a whitespace-separated ASCII form at
//! 16 significant figures (human-diffable, used for text restart files).
//! History arrays and device state are out of scope here — those are the
//! loader's restart responsibility, not the integrator's.

use crate::breakpoints::{BreakpointKind, BreakpointSet};
use crate::error::{Error, Result};
use crate::step_control::{StepErrorControl, MAX_ORDER};

/// The subset of [`StepErrorControl`] that must survive a restart: enough
/// to resume stepping without replaying history from t=0. `psi` is captured
/// in full, not just `psi[0]`: `update_coeffs`'s recursion walks the whole
/// array to rebuild alpha/beta/sigma/gamma, so a restored run at order > 1
/// needs every entry, not only the most recent step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepControlCheckpoint {
    pub current_time: f64,
    pub current_step: f64,
    pub used_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub current_order: usize,
    pub used_order: usize,
    pub nscsco: usize,
    pub number_of_steps: u64,
    pub nef: u32,
    pub initial_phase: bool,
    pub psi: [f64; MAX_ORDER + 1],
}

impl StepControlCheckpoint {
    pub fn capture(sec: &StepErrorControl, current_time: f64) -> Self {
        Self {
            current_time,
            current_step: sec.current_step,
            used_step: sec.used_step,
            min_step: sec.min_step,
            max_step: sec.max_step,
            current_order: sec.current_order,
            used_order: sec.used_order,
            nscsco: sec.nscsco,
            number_of_steps: sec.number_of_steps,
            nef: sec.nef,
            initial_phase: sec.initial_phase,
            psi: sec.psi,
        }
    }

    pub fn restore_into(&self, sec: &mut StepErrorControl) {
        sec.current_step = self.current_step;
        sec.used_step = self.used_step;
        sec.min_step = self.min_step;
        sec.max_step = self.max_step;
        sec.current_order = self.current_order;
        sec.used_order = self.used_order;
        sec.nscsco = self.nscsco;
        sec.number_of_steps = self.number_of_steps;
        sec.nef = self.nef;
        sec.initial_phase = self.initial_phase;
        sec.psi = self.psi;
    }

    const SCALAR_FIELDS: usize = 9;
    const PACKED_BYTES: usize = Self::SCALAR_FIELDS * 8 + (MAX_ORDER + 1) * 8;

    /// Packs the scalars as little-endian `f64`/`u64` (order/counters/flags
    /// as `u64`, `initial_phase` as 0/1) followed by the full `psi` array,
    /// the layout an MPI pack/unpack byte buffer would carry verbatim.
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PACKED_BYTES);
        for v in [
            self.current_time,
            self.current_step,
            self.used_step,
            self.min_step,
            self.max_step,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.psi {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&(self.current_order as u64).to_le_bytes());
        buf.extend_from_slice(&(self.used_order as u64).to_le_bytes());
        buf.extend_from_slice(&(self.nscsco as u64).to_le_bytes());
        buf.extend_from_slice(&self.number_of_steps.to_le_bytes());
        buf.extend_from_slice(&(self.nef as u64).to_le_bytes());
        buf.extend_from_slice(&(self.initial_phase as u64).to_le_bytes());
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::PACKED_BYTES {
            return Err(Error::Restart(format!(
                "expected {} bytes, got {}",
                Self::PACKED_BYTES,
                bytes.len()
            )));
        }
        let f = |i: usize| f64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
        let psi_base = 5;
        let u_base = psi_base + MAX_ORDER + 1;
        let u = |i: usize| u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
        let mut psi = [0.0; MAX_ORDER + 1];
        for (i, slot) in psi.iter_mut().enumerate() {
            *slot = f(psi_base + i);
        }
        Ok(Self {
            current_time: f(0),
            current_step: f(1),
            used_step: f(2),
            min_step: f(3),
            max_step: f(4),
            current_order: u(u_base) as usize,
            used_order: u(u_base + 1) as usize,
            nscsco: u(u_base + 2) as usize,
            number_of_steps: u(u_base + 3),
            nef: u(u_base + 4) as u32,
            initial_phase: u(u_base + 5) != 0,
            psi,
        })
    }

    /// Whitespace-separated ASCII, each float at 16 significant figures. The
    /// `psi` array is written right after the other floats so parsing never
    /// has to interleave float and integer fields.
    pub fn to_ascii(&self) -> String {
        let psi_str = self
            .psi
            .iter()
            .map(|v| format!("{v:.16e}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{:.16e} {:.16e} {:.16e} {:.16e} {:.16e} {psi_str} {} {} {} {} {} {}",
            self.current_time,
            self.current_step,
            self.used_step,
            self.min_step,
            self.max_step,
            self.current_order,
            self.used_order,
            self.nscsco,
            self.number_of_steps,
            self.nef,
            self.initial_phase as u8,
        )
    }

    pub fn from_ascii(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let mut next_f64 = || -> Result<f64> {
            fields
                .next()
                .ok_or_else(|| Error::Restart("truncated restart record".into()))?
                .parse()
                .map_err(|e| Error::Restart(format!("bad float in restart record: {e}")))
        };
        let current_time = next_f64()?;
        let current_step = next_f64()?;
        let used_step = next_f64()?;
        let min_step = next_f64()?;
        let max_step = next_f64()?;
        let mut psi = [0.0; MAX_ORDER + 1];
        for slot in psi.iter_mut() {
            *slot = next_f64()?;
        }
        let mut next_usize = || -> Result<usize> {
            fields
                .next()
                .ok_or_else(|| Error::Restart("truncated restart record".into()))?
                .parse()
                .map_err(|e| Error::Restart(format!("bad integer in restart record: {e}")))
        };
        let current_order = next_usize()?;
        let used_order = next_usize()?;
        let nscsco = next_usize()?;
        let number_of_steps = fields
            .next()
            .ok_or_else(|| Error::Restart("truncated restart record".into()))?
            .parse()
            .map_err(|e| Error::Restart(format!("bad step count in restart record: {e}")))?;
        let nef: u32 = fields
            .next()
            .ok_or_else(|| Error::Restart("truncated restart record".into()))?
            .parse()
            .map_err(|e| Error::Restart(format!("bad failure count in restart record: {e}")))?;
        let initial_phase_flag: u8 = fields
            .next()
            .ok_or_else(|| Error::Restart("truncated restart record".into()))?
            .parse()
            .map_err(|e| Error::Restart(format!("bad initial-phase flag in restart record: {e}")))?;
        Ok(Self {
            current_time,
            current_step,
            used_step,
            min_step,
            max_step,
            current_order,
            used_order,
            nscsco,
            number_of_steps,
            nef,
            initial_phase: initial_phase_flag != 0,
            psi,
        })
    }
}

/// Serializes the breakpoints still ahead of `current_time`, excluding the
/// terminal pause at `final_time`: a restart only needs to remember what is
/// left to hit before the run ends, and the caller already knows where the
/// run ends without a round-trip through the restart record.
pub fn dump_breakpoints_ascii(bps: &BreakpointSet, current_time: f64, final_time: f64) -> String {
    bps.iter()
        .filter(|&(t, kind)| {
            t > current_time && !(kind == BreakpointKind::Pause && (t - final_time).abs() < bps.merge_tolerance())
        })
        .map(|(t, kind)| {
            let tag = match kind {
                BreakpointKind::Simple => 'S',
                BreakpointKind::Pause => 'P',
            };
            format!("{t:.16e}{tag}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn restore_breakpoints_ascii(line: &str, merge_tolerance: f64) -> Result<BreakpointSet> {
    let mut bps = BreakpointSet::new(merge_tolerance);
    for token in line.split_whitespace() {
        let (time_str, tag) = token.split_at(token.len() - 1);
        let time: f64 = time_str
            .parse()
            .map_err(|e| Error::Restart(format!("bad breakpoint time: {e}")))?;
        let kind = match tag {
            "S" => BreakpointKind::Simple,
            "P" => BreakpointKind::Pause,
            other => return Err(Error::Restart(format!("unknown breakpoint tag: {other}"))),
        };
        bps.set_break_point(time, kind);
    }
    Ok(bps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_control::TuningConstants;

    fn checkpoint() -> StepControlCheckpoint {
        StepControlCheckpoint {
            current_time: 1.2345678901234,
            current_step: 1e-6,
            used_step: 9e-7,
            min_step: 1e-12,
            max_step: 1e-2,
            current_order: 3,
            used_order: 2,
            nscsco: 1,
            number_of_steps: 42,
            nef: 2,
            initial_phase: false,
            psi: [1e-6, 2e-6, 3e-6, 4e-6, 5e-6, 6e-6],
        }
    }

    #[test]
    fn packed_round_trips() {
        let cp = checkpoint();
        let bytes = cp.pack();
        assert_eq!(bytes.len(), StepControlCheckpoint::PACKED_BYTES);
        assert_eq!(StepControlCheckpoint::unpack(&bytes).unwrap(), cp);
    }

    #[test]
    fn ascii_round_trips() {
        let cp = checkpoint();
        let line = cp.to_ascii();
        let back = StepControlCheckpoint::from_ascii(&line).unwrap();
        assert!((back.current_time - cp.current_time).abs() < 1e-20);
        assert_eq!(back.current_order, cp.current_order);
        assert_eq!(back.number_of_steps, cp.number_of_steps);
        assert_eq!(back.nef, cp.nef);
        assert_eq!(back.initial_phase, cp.initial_phase);
        for (a, b) in back.psi.iter().zip(cp.psi.iter()) {
            assert!((a - b).abs() < 1e-20);
        }
    }

    #[test]
    fn unpack_rejects_wrong_length() {
        assert!(StepControlCheckpoint::unpack(&[0u8; 10]).is_err());
    }

    #[test]
    fn restore_into_applies_every_field() {
        let mut sec = StepErrorControl::new(1, 5, TuningConstants::default());
        let cp = checkpoint();
        cp.restore_into(&mut sec);
        assert_eq!(sec.current_order, 3);
        assert_eq!(sec.number_of_steps, 42);
        assert_eq!(sec.nef, cp.nef);
        assert_eq!(sec.initial_phase, cp.initial_phase);
        assert_eq!(sec.psi, cp.psi);
    }

    #[test]
    fn breakpoints_round_trip_ascii_drop_past_points_and_terminal_pause() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.0, 10.0);
        bps.set_break_point(2.0, BreakpointKind::Simple);
        bps.set_break_point(5.0, BreakpointKind::Simple);
        let dumped = dump_breakpoints_ascii(&bps, 3.0, 10.0);
        let restored = restore_breakpoints_ascii(&dumped, 1e-12).unwrap();
        let times: Vec<f64> = restored.iter().map(|(t, _)| t).collect();
        assert_eq!(times, vec![5.0]);
    }

    #[test]
    fn non_terminal_pause_still_survives_the_dump() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.0, 10.0);
        bps.set_break_point(6.0, BreakpointKind::Pause);
        let dumped = dump_breakpoints_ascii(&bps, 3.0, 10.0);
        let restored = restore_breakpoints_ascii(&dumped, 1e-12).unwrap();
        let times: Vec<f64> = restored.iter().map(|(t, _)| t).collect();
        assert_eq!(times, vec![6.0]);
        assert!(restored.iter().all(|(t, _)| t != 10.0));
    }
}
