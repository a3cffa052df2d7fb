//! Simulated entities: dice and coins.
//!
//! An entity is addressed by `(entity_type, entity_id)` and computes one
//! step outcome per call from a generator it owns exclusively. Generators
//! are ChaCha8 streams seeded at activation, so the same seed and the same
//! call sequence always produce the same values.

use crate::error::EntityError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Entity type served by dice hosts.
pub const DIE_ENTITY_TYPE: &str = "diceActorType";

/// Entity type served by coin hosts.
pub const COIN_ENTITY_TYPE: &str = "coinActorType";

/// Default number of die faces.
pub const DEFAULT_DIE_SIDES: u32 = 6;

/// Operation name for stepping an entity.
pub const STEP_OPERATION: &str = "Step";

/// Operations an entity directory can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Step,
}

impl Operation {
    /// Parses an operation name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case(STEP_OPERATION) {
            Some(Self::Step)
        } else {
            None
        }
    }
}

/// Face of a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinFace {
    Heads,
    Tails,
}

impl std::fmt::Display for CoinFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heads => f.write_str("heads"),
            Self::Tails => f.write_str("tails"),
        }
    }
}

/// Outcome of one entity step.
///
/// Encoded untagged: a die result is a bare JSON number, a coin result a
/// bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepValue {
    Number(u32),
    Face(CoinFace),
}

impl StepValue {
    /// Integer form used in event payloads (heads = 1, tails = 2).
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Number(n) => i64::from(*n),
            Self::Face(CoinFace::Heads) => 1,
            Self::Face(CoinFace::Tails) => 2,
        }
    }
}

impl std::fmt::Display for StepValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Face(face) => write!(f, "{}", face),
        }
    }
}

/// Context handed to an entity for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContext {
    /// Round number (1-based) requesting the step
    #[serde(default)]
    pub round: u64,

    /// Simulated time of the round, seconds since the UNIX epoch
    #[serde(default)]
    pub simulated_time: u64,
}

/// A steppable simulated entity.
pub trait Entity: Send + 'static {
    /// Entity type this instance belongs to.
    fn entity_type(&self) -> &str;

    /// Computes one step outcome, advancing the generator exactly once.
    fn step(&mut self, ctx: &StepContext) -> Result<StepValue, EntityError>;
}

/// Creates entity instances on first use.
pub trait EntityFactory: Send + Sync + 'static {
    /// Entity type produced by this factory.
    fn entity_type(&self) -> &str;

    /// Activates an instance owning `rng`.
    fn activate(&self, rng: ChaCha8Rng) -> Box<dyn Entity>;
}

/// A die with a configurable number of sides.
pub struct Die {
    sides: u32,
    rng: ChaCha8Rng,
}

impl Die {
    /// Creates a die owning the given generator.
    pub fn new(sides: u32, rng: ChaCha8Rng) -> Result<Self, EntityError> {
        if sides < 2 {
            return Err(EntityError::InvalidSides(sides));
        }
        Ok(Self { sides, rng })
    }

    /// Creates a die seeded directly from `seed`.
    pub fn with_seed(sides: u32, seed: u64) -> Result<Self, EntityError> {
        Self::new(sides, ChaCha8Rng::seed_from_u64(seed))
    }

    /// Number of faces.
    pub fn sides(&self) -> u32 {
        self.sides
    }
}

impl Entity for Die {
    fn entity_type(&self) -> &str {
        DIE_ENTITY_TYPE
    }

    fn step(&mut self, _ctx: &StepContext) -> Result<StepValue, EntityError> {
        Ok(StepValue::Number(self.rng.gen_range(1..=self.sides)))
    }
}

/// A fair coin.
pub struct Coin {
    rng: ChaCha8Rng,
}

impl Coin {
    /// Creates a coin owning the given generator.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }

    /// Creates a coin seeded directly from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl Entity for Coin {
    fn entity_type(&self) -> &str {
        COIN_ENTITY_TYPE
    }

    fn step(&mut self, _ctx: &StepContext) -> Result<StepValue, EntityError> {
        // Two-outcome draw: 1 => heads, 2 => tails
        let face = match self.rng.gen_range(1..=2u32) {
            1 => CoinFace::Heads,
            _ => CoinFace::Tails,
        };
        Ok(StepValue::Face(face))
    }
}

/// Factory for dice of a fixed side count.
#[derive(Debug, Clone)]
pub struct DieFactory {
    sides: u32,
}

impl DieFactory {
    /// Creates a factory, rejecting side counts below 2.
    pub fn new(sides: u32) -> Result<Self, EntityError> {
        if sides < 2 {
            return Err(EntityError::InvalidSides(sides));
        }
        Ok(Self { sides })
    }
}

impl Default for DieFactory {
    fn default() -> Self {
        Self {
            sides: DEFAULT_DIE_SIDES,
        }
    }
}

impl EntityFactory for DieFactory {
    fn entity_type(&self) -> &str {
        DIE_ENTITY_TYPE
    }

    fn activate(&self, rng: ChaCha8Rng) -> Box<dyn Entity> {
        Box::new(Die {
            sides: self.sides,
            rng,
        })
    }
}

/// Factory for coins.
#[derive(Debug, Clone, Default)]
pub struct CoinFactory;

impl EntityFactory for CoinFactory {
    fn entity_type(&self) -> &str {
        COIN_ENTITY_TYPE
    }

    fn activate(&self, rng: ChaCha8Rng) -> Box<dyn Entity> {
        Box::new(Coin::new(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_rolls(sides: u32, seed: u64, n: usize) -> Vec<u32> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(1..=sides)).collect()
    }

    #[test]
    fn test_die_rejects_too_few_sides() {
        assert_eq!(Die::with_seed(1, 99).err(), Some(EntityError::InvalidSides(1)));
        assert_eq!(DieFactory::new(0).err(), Some(EntityError::InvalidSides(0)));
    }

    #[test]
    fn test_die_matches_reference_stream() {
        let mut die = Die::with_seed(6, 99).unwrap();
        let ctx = StepContext::default();
        let rolls: Vec<u32> = (0..50)
            .map(|_| match die.step(&ctx).unwrap() {
                StepValue::Number(n) => n,
                other => panic!("die produced {:?}", other),
            })
            .collect();

        assert_eq!(rolls, reference_rolls(6, 99, 50));
    }

    #[test]
    fn test_coin_values() {
        let mut coin = Coin::with_seed(99);
        let ctx = StepContext::default();
        let mut seen_heads = false;
        let mut seen_tails = false;

        for _ in 0..200 {
            match coin.step(&ctx).unwrap() {
                StepValue::Face(CoinFace::Heads) => seen_heads = true,
                StepValue::Face(CoinFace::Tails) => seen_tails = true,
                other => panic!("coin produced {:?}", other),
            }
        }

        assert!(seen_heads && seen_tails);
    }

    #[test]
    fn test_step_value_wire_form() {
        assert_eq!(serde_json::to_string(&StepValue::Number(4)).unwrap(), "4");
        assert_eq!(
            serde_json::to_string(&StepValue::Face(CoinFace::Tails)).unwrap(),
            r#""tails""#
        );
        let v: StepValue = serde_json::from_str(r#""heads""#).unwrap();
        assert_eq!(v, StepValue::Face(CoinFace::Heads));
        assert_eq!(v.as_i64(), 1);
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("Step"), Some(Operation::Step));
        assert_eq!(Operation::parse("step"), Some(Operation::Step));
        assert_eq!(Operation::parse("Roll"), None);
    }

    proptest! {
        #[test]
        fn prop_die_is_reproducible(sides in 2u32..=100, seed in any::<u64>(), n in 1usize..64) {
            let mut die = Die::with_seed(sides, seed).unwrap();
            let ctx = StepContext::default();
            let rolls: Vec<u32> = (0..n)
                .map(|_| match die.step(&ctx).unwrap() {
                    StepValue::Number(v) => v,
                    StepValue::Face(_) => 0,
                })
                .collect();

            prop_assert!(rolls.iter().all(|v| (1..=sides).contains(v)));
            prop_assert_eq!(rolls, reference_rolls(sides, seed, n));
        }

        #[test]
        fn prop_coin_domain_is_closed(seed in any::<u64>()) {
            let mut coin = Coin::with_seed(seed);
            let ctx = StepContext::default();
            for _ in 0..32 {
                let value = coin.step(&ctx).unwrap();
                prop_assert!(matches!(value, StepValue::Face(CoinFace::Heads) | StepValue::Face(CoinFace::Tails)));
            }
        }
    }
}
