pub const BASE_TILE: u32 = 50;
pub const MAX_TILE: u32 = 800;
pub const TILE_TIERS: [u32; 5] = [50, 100, 200, 400, 800];

pub fn is_tile_value(value: u32) -> bool {
    TILE_TIERS.contains(&value)
}

/// Value produced by merging two tiles of `value`, or `None` at the top tier.
pub fn next_tier(value: u32) -> Option<u32> {
    if !is_tile_value(value) || value >= MAX_TILE {
        return None;
    }
    Some(value * 2)
}

pub fn tier_index(value: u32) -> Option<usize> {
    TILE_TIERS.iter().position(|tier| *tier == value)
}

pub fn tier_label(value: u32) -> &'static str {
    match value {
        800.. => "tree",
        400..=799 => "reindeer",
        200..=399 => "bell",
        100..=199 => "snowflake",
        _ => "candy",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_double_until_max() {
        assert_eq!(next_tier(50), Some(100));
        assert_eq!(next_tier(400), Some(800));
        assert_eq!(next_tier(800), None);
        assert_eq!(next_tier(75), None);
    }

    #[test]
    fn labels_follow_tiers() {
        assert_eq!(tier_label(50), "candy");
        assert_eq!(tier_label(200), "bell");
        assert_eq!(tier_label(MAX_TILE), "tree");
        assert_eq!(tier_index(400), Some(3));
    }
}
