//! Active liveness: ask the user to turn their head and come back.
//!
//! The requested direction is drawn from a caller-supplied RNG so a seeded
//! generator makes the whole sequence reproducible.

use rand::Rng;

use crate::liveness::HeadTurn;

/// Direction the user is asked to turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
    /// Either side is accepted.
    Either,
}

impl TurnDirection {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => Self::Left,
            1 => Self::Right,
            _ => Self::Either,
        }
    }

    fn accepts(self, turn: HeadTurn) -> bool {
        matches!(
            (self, turn),
            (Self::Left, HeadTurn::Left)
                | (Self::Right, HeadTurn::Right)
                | (Self::Either, HeadTurn::Left | HeadTurn::Right)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStep {
    AwaitStraight,
    AwaitTurn,
    AwaitReturn,
    Completed,
}

/// Straight → turn → straight sequence for one tracked face.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadTurnChallenge {
    direction: TurnDirection,
    step: ChallengeStep,
}

impl HeadTurnChallenge {
    pub fn new(direction: TurnDirection) -> Self {
        Self {
            direction,
            step: ChallengeStep::AwaitStraight,
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(TurnDirection::random(rng))
    }

    pub fn direction(&self) -> TurnDirection {
        self.direction
    }

    pub fn step(&self) -> ChallengeStep {
        self.step
    }

    pub fn is_completed(&self) -> bool {
        self.step == ChallengeStep::Completed
    }

    /// Feed one frame's head orientation. Completion is sticky.
    pub fn advance(&mut self, turn: HeadTurn) -> ChallengeStep {
        self.step = match self.step {
            ChallengeStep::AwaitStraight if turn == HeadTurn::Straight => ChallengeStep::AwaitTurn,
            ChallengeStep::AwaitTurn if self.direction.accepts(turn) => ChallengeStep::AwaitReturn,
            ChallengeStep::AwaitReturn if turn == HeadTurn::Straight => ChallengeStep::Completed,
            step => step,
        };
        self.step
    }

    /// Short instruction for the current step.
    pub fn instruction(&self) -> &'static str {
        match (self.step, self.direction) {
            (ChallengeStep::AwaitStraight, _) => "Look straight at the camera",
            (ChallengeStep::AwaitTurn, TurnDirection::Left) => "Turn your head to the left",
            (ChallengeStep::AwaitTurn, TurnDirection::Right) => "Turn your head to the right",
            (ChallengeStep::AwaitTurn, TurnDirection::Either) => "Turn your head to one side",
            (ChallengeStep::AwaitReturn, _) => "Now look straight again",
            (ChallengeStep::Completed, _) => "Head movement confirmed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_full_sequence_left() {
        let mut c = HeadTurnChallenge::new(TurnDirection::Left);
        assert_eq!(c.advance(HeadTurn::Neutral), ChallengeStep::AwaitStraight);
        assert_eq!(c.advance(HeadTurn::Straight), ChallengeStep::AwaitTurn);
        assert_eq!(c.advance(HeadTurn::Right), ChallengeStep::AwaitTurn);
        assert_eq!(c.advance(HeadTurn::Left), ChallengeStep::AwaitReturn);
        assert_eq!(c.advance(HeadTurn::Neutral), ChallengeStep::AwaitReturn);
        assert_eq!(c.advance(HeadTurn::Straight), ChallengeStep::Completed);
        assert!(c.is_completed());
    }

    #[test]
    fn test_either_accepts_both_sides() {
        for turn in [HeadTurn::Left, HeadTurn::Right] {
            let mut c = HeadTurnChallenge::new(TurnDirection::Either);
            c.advance(HeadTurn::Straight);
            assert_eq!(c.advance(turn), ChallengeStep::AwaitReturn);
        }
    }

    #[test]
    fn test_turn_before_straight_does_not_count() {
        let mut c = HeadTurnChallenge::new(TurnDirection::Right);
        assert_eq!(c.advance(HeadTurn::Right), ChallengeStep::AwaitStraight);
    }

    #[test]
    fn test_completion_is_sticky() {
        let mut c = HeadTurnChallenge::new(TurnDirection::Right);
        for turn in [HeadTurn::Straight, HeadTurn::Right, HeadTurn::Straight] {
            c.advance(turn);
        }
        assert_eq!(c.advance(HeadTurn::Left), ChallengeStep::Completed);
    }

    #[test]
    fn test_seeded_direction_is_reproducible() {
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..16).map(|_| TurnDirection::random(&mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(7);
            (0..16).map(|_| TurnDirection::random(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_instruction_tracks_step() {
        let mut c = HeadTurnChallenge::new(TurnDirection::Left);
        assert_eq!(c.instruction(), "Look straight at the camera");
        c.advance(HeadTurn::Straight);
        assert_eq!(c.instruction(), "Turn your head to the left");
    }
}
