use rand::Rng;

/// One point of the target-utilization schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub at_ms: u64,
    /// Target utilization in [0, 1].
    pub target: f64,
}

/// Piecewise-linear target-utilization schedule over elapsed run time.
///
/// Queried by elapsed time only; holds no other state, so re-reading from
/// t=0 reproduces the same sequence. A driving loop can use this to shape
/// offered load without the testers knowing about it.
#[derive(Debug, Clone)]
pub struct TrafficCurve {
    waypoints: Vec<Waypoint>,
}

impl TrafficCurve {
    /// Generate a random schedule for a run of `duration_ms`: the first
    /// waypoint sits at t=0 with a target in [0.1, 0.5], intermediate
    /// waypoints arrive every 30-300 s with targets in [0.1, 0.95], and
    /// the last waypoint lands exactly at `duration_ms`.
    pub fn generate(duration_ms: u64) -> Self {
        let mut rng = rand::thread_rng();
        let mut waypoints = vec![Waypoint {
            at_ms: 0,
            target: rng.gen_range(0.1..=0.5),
        }];

        let mut t = 0u64;
        loop {
            t += rng.gen_range(30_000..=300_000);
            if t >= duration_ms {
                break;
            }
            waypoints.push(Waypoint {
                at_ms: t,
                target: rng.gen_range(0.1..=0.95),
            });
        }

        waypoints.push(Waypoint {
            at_ms: duration_ms,
            target: rng.gen_range(0.1..=0.95),
        });

        Self { waypoints }
    }

    pub fn from_waypoints(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Current target utilization at `elapsed_ms`, linearly interpolated
    /// between the two bracketing waypoints and clamped at both ends.
    pub fn tick(&self, elapsed_ms: u64) -> f64 {
        let first = match self.waypoints.first() {
            Some(w) => w,
            None => return 0.0,
        };
        if elapsed_ms <= first.at_ms {
            return first.target;
        }
        let last = self.waypoints.last().expect("non-empty");
        if elapsed_ms >= last.at_ms {
            return last.target;
        }

        let after = self
            .waypoints
            .iter()
            .position(|w| w.at_ms > elapsed_ms)
            .expect("elapsed below last waypoint");
        let lo = self.waypoints[after - 1];
        let hi = self.waypoints[after];

        let span = (hi.at_ms - lo.at_ms) as f64;
        let frac = (elapsed_ms - lo.at_ms) as f64 / span;
        lo.target + (hi.target - lo.target) * frac
    }
}
