//! Identifier newtypes.

use std::fmt;

/// A participant (user) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct UserId(pub u64);

/// An investment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct InvestmentId(pub u64);

/// A matrix position record identifier, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PositionId(pub u64);

macro_rules! id_impls {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(
            impl $ty {
                /// Get the raw value.
                #[inline]
                pub const fn value(&self) -> u64 {
                    self.0
                }
            }

            impl From<u64> for $ty {
                fn from(value: u64) -> Self {
                    Self(value)
                }
            }

            impl From<$ty> for u64 {
                fn from(value: $ty) -> Self {
                    value.0
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }
        )*
    };
}

id_impls! {
    UserId => "user#",
    InvestmentId => "investment#",
    PositionId => "position#",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        assert_eq!(UserId(7).to_string(), "user#7");
        assert_eq!(InvestmentId(12).to_string(), "investment#12");
        assert_eq!(PositionId(3).to_string(), "position#3");
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(UserId(1) < UserId(2));
        assert_eq!(u64::from(UserId::from(9)), 9);
    }
}
