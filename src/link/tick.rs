//! Command-loop tick planning
//!
//! Each tick is planned fresh from the current input snapshot; there is no
//! command queue, so a late tick drops stale intent instead of replaying it.

use drover_shared::{CommandFrame, ToolCommand, Twist};

/// Latest operator intent, written only by the input-producing context
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSnapshot {
    /// Raw stick deflection in [-1, 1] per axis, before rate scaling
    pub twist: Twist,
    pub tool: ToolCommand,
    /// Immediate-stop condition currently asserted by the operator
    pub estop: bool,
    /// Whether the owning context is foregrounded; defaults to false so a
    /// session sends neutral commands until the first input report arrives
    pub attended: bool,
}

/// Rate multipliers applied to raw stick deflection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedEnvelope {
    /// m/s at full deflection
    pub normal_linear: f64,
    /// rad/s at full deflection
    pub normal_angular: f64,
    pub boost_linear: f64,
    pub boost_angular: f64,
}

impl Default for SpeedEnvelope {
    fn default() -> Self {
        Self {
            normal_linear: 0.5,
            normal_angular: 1.0,
            boost_linear: 1.2,
            boost_angular: 1.8,
        }
    }
}

/// Plan the frames for one command-loop tick.
///
/// Priority order: an asserted stop condition yields exactly one EStop frame;
/// an unattended owner yields a neutral twist so no stale command keeps
/// executing; otherwise the scaled twist, plus the tool command when any
/// tool axis or button is driven.
pub fn plan_tick(input: &InputSnapshot, envelope: &SpeedEnvelope) -> Vec<CommandFrame> {
    if input.estop {
        return vec![CommandFrame::EStop];
    }

    if !input.attended {
        return vec![CommandFrame::Twist(Twist::zero())];
    }

    let (linear_rate, angular_rate) = if input.twist.boost {
        (envelope.boost_linear, envelope.boost_angular)
    } else {
        (envelope.normal_linear, envelope.normal_angular)
    };

    let mut frames = vec![CommandFrame::Twist(Twist {
        linear: input.twist.linear * linear_rate,
        angular: input.twist.angular * angular_rate,
        boost: input.twist.boost,
    })];

    if input.tool.is_active() {
        frames.push(CommandFrame::Tool(input.tool));
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driving_input() -> InputSnapshot {
        InputSnapshot {
            twist: Twist {
                linear: 1.0,
                angular: -0.5,
                boost: false,
            },
            attended: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_estop_preempts_everything() {
        let mut input = driving_input();
        input.estop = true;
        input.tool.motor = 1.0;

        let frames = plan_tick(&input, &SpeedEnvelope::default());
        assert_eq!(frames, vec![CommandFrame::EStop]);
    }

    #[test]
    fn test_unattended_owner_sends_neutral_twist() {
        let mut input = driving_input();
        input.attended = false;
        input.tool.action_a = true;

        let frames = plan_tick(&input, &SpeedEnvelope::default());
        assert_eq!(frames, vec![CommandFrame::Twist(Twist::zero())]);
    }

    #[test]
    fn test_normal_rate_scaling() {
        let envelope = SpeedEnvelope::default();
        let frames = plan_tick(&driving_input(), &envelope);

        assert_eq!(frames.len(), 1);
        match frames[0] {
            CommandFrame::Twist(twist) => {
                assert_eq!(twist.linear, 1.0 * envelope.normal_linear);
                assert_eq!(twist.angular, -0.5 * envelope.normal_angular);
            }
            ref other => panic!("expected a twist, got {:?}", other),
        }
    }

    #[test]
    fn test_boost_rate_scaling() {
        let envelope = SpeedEnvelope::default();
        assert!(envelope.boost_linear > envelope.normal_linear);

        let mut input = driving_input();
        input.twist.boost = true;
        let frames = plan_tick(&input, &envelope);

        match frames[0] {
            CommandFrame::Twist(twist) => {
                assert_eq!(twist.linear, 1.0 * envelope.boost_linear);
                assert_eq!(twist.angular, -0.5 * envelope.boost_angular);
            }
            ref other => panic!("expected a twist, got {:?}", other),
        }
    }

    #[test]
    fn test_active_tool_rides_along() {
        let mut input = driving_input();
        input.tool.axis = 0.7;

        let frames = plan_tick(&input, &SpeedEnvelope::default());
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], CommandFrame::Tool(tool) if tool.axis == 0.7));
    }

    #[test]
    fn test_idle_tool_is_not_sent() {
        let frames = plan_tick(&driving_input(), &SpeedEnvelope::default());
        assert_eq!(frames.len(), 1);
    }
}
