use rand::Rng;
use std::time::Duration;

/// Inclusive-exclusive millisecond delay range, sampled per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.gen_range(self.min_ms..self.max_ms))
    }
}

/// One named step of the human-browsing simulation. Steps are plain data;
/// the interpreter below turns them into page actions, so a pipeline can
/// be inspected, reordered or stubbed without touching the browser code.
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorStep {
    /// Do nothing for a randomized interval.
    Idle { delay: DelayRange },
    /// Several scrolls of randomized magnitude and direction.
    ScrollBurst {
        count_min: u32,
        count_max: u32,
        step_min_px: i64,
        step_max_px: i64,
        pause: DelayRange,
    },
    /// Move the pointer somewhere unremarkable.
    PointerMove {
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
        pause: DelayRange,
    },
    /// Click one randomly chosen safe element (plain text containers).
    SafeClick { pause: DelayRange },
}

/// The page actions a pipeline run can request. The real implementation
/// drives a browser tab; tests record the calls.
pub trait ActionSink {
    fn scroll_by(&self, delta_y: i64) -> anyhow::Result<()>;
    fn move_pointer(&self, x: f64, y: f64) -> anyhow::Result<()>;
    fn click_safe_element(&self) -> anyhow::Result<()>;
}

/// Default evasion pipeline: settle, wander the page with scrolls, then a
/// pointer move and one harmless click.
pub fn default_pipeline() -> Vec<BehaviorStep> {
    vec![
        BehaviorStep::Idle {
            delay: DelayRange::new(4_000, 10_000),
        },
        BehaviorStep::ScrollBurst {
            count_min: 3,
            count_max: 7,
            step_min_px: 400,
            step_max_px: 1_000,
            pause: DelayRange::new(2_000, 5_000),
        },
        BehaviorStep::PointerMove {
            x_min: 200.0,
            x_max: 1_000.0,
            y_min: 100.0,
            y_max: 700.0,
            pause: DelayRange::new(1_500, 4_000),
        },
        BehaviorStep::SafeClick {
            pause: DelayRange::new(2_000, 5_000),
        },
    ]
}

fn pause<R: Rng + ?Sized>(rng: &mut R, delay: DelayRange, time_scale: f64) {
    let sampled = delay.sample(rng);
    if time_scale <= 0.0 {
        return;
    }
    std::thread::sleep(sampled.mul_f64(time_scale));
}

/// Interpret a pipeline against a sink. Action failures are returned so
/// the session can classify the url as unavailable; they never panic.
pub fn run_pipeline<R: Rng + ?Sized>(
    sink: &dyn ActionSink,
    steps: &[BehaviorStep],
    rng: &mut R,
    time_scale: f64,
) -> anyhow::Result<()> {
    for step in steps {
        match *step {
            BehaviorStep::Idle { delay } => pause(rng, delay, time_scale),
            BehaviorStep::ScrollBurst {
                count_min,
                count_max,
                step_min_px,
                step_max_px,
                pause: step_pause,
            } => {
                let count = rng.gen_range(count_min..=count_max);
                for _ in 0..count {
                    let magnitude = rng.gen_range(step_min_px..=step_max_px);
                    let delta = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
                    sink.scroll_by(delta)?;
                    pause(rng, step_pause, time_scale);
                }
            }
            BehaviorStep::PointerMove {
                x_min,
                x_max,
                y_min,
                y_max,
                pause: step_pause,
            } => {
                let x = rng.gen_range(x_min..x_max);
                let y = rng.gen_range(y_min..y_max);
                sink.move_pointer(x, y)?;
                pause(rng, step_pause, time_scale);
            }
            BehaviorStep::SafeClick { pause: step_pause } => {
                sink.click_safe_element()?;
                pause(rng, step_pause, time_scale);
            }
        }
    }
    Ok(())
}
