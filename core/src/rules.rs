use crate::tile::{is_tile_value, BASE_TILE};

pub const SPAWN_COST_DEFAULT: i64 = 50;
pub const REWARD_DIVISOR_DEFAULT: u32 = 10;
pub const STARTING_COINS_DEFAULT: i64 = 0;
/// Opening balance used by the shop variant of the event.
pub const SHOP_STARTING_COINS: i64 = 1250;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("spawn value {0} is not a tile value")]
    SpawnValue(u32),
    #[error("spawn cost must not be negative, got {0}")]
    SpawnCost(i64),
    #[error("reward divisor must be positive")]
    RewardDivisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    pub spawn_cost: i64,
    pub spawn_value: u32,
    pub starting_coins: i64,
    pub reward_divisor: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            spawn_cost: SPAWN_COST_DEFAULT,
            spawn_value: BASE_TILE,
            starting_coins: STARTING_COINS_DEFAULT,
            reward_divisor: REWARD_DIVISOR_DEFAULT,
        }
    }
}

impl GameRules {
    pub fn validate(&self) -> Result<(), RulesError> {
        if !is_tile_value(self.spawn_value) {
            return Err(RulesError::SpawnValue(self.spawn_value));
        }
        if self.spawn_cost < 0 {
            return Err(RulesError::SpawnCost(self.spawn_cost));
        }
        if self.reward_divisor == 0 {
            return Err(RulesError::RewardDivisor);
        }
        Ok(())
    }

    /// Coins granted for producing a tile of `value` by merging.
    pub fn reward_for(&self, value: u32) -> i64 {
        i64::from(value / self.reward_divisor.max(1))
    }

    pub fn can_afford_spawn(&self, balance: i64) -> bool {
        balance >= self.spawn_cost
    }
}
