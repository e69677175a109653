//! Common types for creatures

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Anatomical role of a body part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BodyCategory {
    Head,
    Torso,
    Hip,
    Leg,
    Arm,
    Hand,
    Shoulder,
    Foot,
    Other,
}

impl BodyCategory {
    pub const ALL: [BodyCategory; 9] = [
        BodyCategory::Head,
        BodyCategory::Torso,
        BodyCategory::Hip,
        BodyCategory::Leg,
        BodyCategory::Arm,
        BodyCategory::Hand,
        BodyCategory::Shoulder,
        BodyCategory::Foot,
        BodyCategory::Other,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            BodyCategory::Head => "Head",
            BodyCategory::Torso => "Torso",
            BodyCategory::Hip => "Hip",
            BodyCategory::Leg => "Leg",
            BodyCategory::Arm => "Arm",
            BodyCategory::Hand => "Hand",
            BodyCategory::Shoulder => "Shoulder",
            BodyCategory::Foot => "Foot",
            BodyCategory::Other => "Other",
        }
    }

    fn flag(self) -> CategorySet {
        CategorySet::from_bits_retain(1 << self.index())
    }
}

impl std::fmt::Display for BodyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for BodyCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BodyCategory::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "Unknown body category: {}. Valid: head, torso, hip, leg, arm, hand, shoulder, foot, other",
                    s
                )
            })
    }
}

/// Total mapping from every category to a value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryMap<T> {
    values: [T; 9],
}

impl<T: Copy> CategoryMap<T> {
    pub fn splat(value: T) -> Self {
        Self { values: [value; 9] }
    }

    pub fn get(&self, category: BodyCategory) -> T {
        self.values[category.index()]
    }

    pub fn set(&mut self, category: BodyCategory, value: T) {
        self.values[category.index()] = value;
    }

    /// Start from `default` and overwrite the listed categories
    pub fn from_entries<I>(default: T, entries: I) -> Self
    where
        I: IntoIterator<Item = (BodyCategory, T)>,
    {
        let mut map = Self::splat(default);
        for (category, value) in entries {
            map.set(category, value);
        }
        map
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyCategory, T)> + '_ {
        BodyCategory::ALL.iter().map(|&c| (c, self.get(c)))
    }
}

impl<T: Copy + Default> Default for CategoryMap<T> {
    fn default() -> Self {
        Self::splat(T::default())
    }
}

bitflags! {
    /// Set of body categories
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CategorySet: u16 {
        const HEAD = 1 << 0;
        const TORSO = 1 << 1;
        const HIP = 1 << 2;
        const LEG = 1 << 3;
        const ARM = 1 << 4;
        const HAND = 1 << 5;
        const SHOULDER = 1 << 6;
        const FOOT = 1 << 7;
        const OTHER = 1 << 8;
    }
}

impl CategorySet {
    pub fn contains_category(&self, category: BodyCategory) -> bool {
        self.contains(category.flag())
    }

    pub fn insert_category(&mut self, category: BodyCategory) {
        self.insert(category.flag());
    }
}

impl FromIterator<BodyCategory> for CategorySet {
    fn from_iter<I: IntoIterator<Item = BodyCategory>>(iter: I) -> Self {
        let mut set = CategorySet::empty();
        for category in iter {
            set.insert_category(category);
        }
        set
    }
}

/// Rotational freedom of one joint axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AxisMotion {
    Locked,
    #[default]
    Free,
}

bitflags! {
    /// Joint axes held at zero rotation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AxisMask: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
    }
}

impl AxisMask {
    pub const AXES: [AxisMask; 3] = [AxisMask::X, AxisMask::Y, AxisMask::Z];

    /// Mask of the locked axes in `motion`
    pub fn locked_from(motion: &[AxisMotion; 3]) -> Self {
        let mut mask = AxisMask::empty();
        for (axis, m) in Self::AXES.iter().zip(motion) {
            if *m == AxisMotion::Locked {
                mask |= *axis;
            }
        }
        mask
    }
}
