use la32_voices::{
    patch::PatchCacheEntry,
    synth::{UnitDriver, UnitId, UnitStart},
};
use tracing::trace;

/// Stand-in for the synthesis layer. Decaying partials finish after a fixed
/// number of ticks, aborting ones on the next tick.
pub struct SimDriver {
    tick: u64,
    release_ticks: u64,
    dying: Vec<(UnitId, u64)>,
}

impl SimDriver {
    pub fn new(release_ticks: u32) -> Self {
        Self {
            tick: 0,
            release_ticks: release_ticks.max(1) as u64,
            dying: Vec::new(),
        }
    }

    fn finish_at(&mut self, unit: UnitId, deadline: u64) {
        match self.dying.iter_mut().find(|(u, _)| *u == unit) {
            Some((_, at)) => *at = (*at).min(deadline),
            None => self.dying.push((unit, deadline)),
        }
    }

    /// Move one tick forward and return the partials that finished.
    pub fn advance(&mut self) -> Vec<UnitId> {
        self.tick += 1;
        let tick = self.tick;
        let mut finished = Vec::new();
        self.dying.retain(|&(unit, at)| {
            if at <= tick {
                finished.push(unit);
                false
            } else {
                true
            }
        });
        finished.sort();
        finished
    }
}

impl UnitDriver for SimDriver {
    fn start_unit(&mut self, start: UnitStart<'_>) {
        trace!(
            unit = start.unit.index(),
            channel = start.channel,
            key = start.key,
            pcm = start.cache.pcm_partial,
            "partial start"
        );
    }

    fn start_decay(&mut self, unit: UnitId) {
        self.finish_at(unit, self.tick + self.release_ticks);
    }

    fn start_abort(&mut self, unit: UnitId) {
        self.finish_at(unit, self.tick + 1);
    }

    fn backup_cache(&mut self, unit: UnitId, _entry: &PatchCacheEntry) {
        trace!(unit = unit.index(), "partial keeps its own parameters");
    }
}
