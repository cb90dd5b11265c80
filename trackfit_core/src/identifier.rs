//! Compact 64-bit identifiers.
//!
//! - [`GeometryId`] packs the position of a node in the detector hierarchy
//!   (volume, boundary, layer, approach, sensitive, channel) into one `u64`.
//! - [`Identifier`] is an opaque source link for measurements, with an
//!   all-ones sentinel meaning "not set".

use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, BitAndAssign, BitOrAssign};

/// Raw value of a geometry identifier.
pub type GeoIdValue = u64;

// ============================================================================
// GEOMETRY ID
// ============================================================================

/// Identifier for geometry nodes.
///
/// Field layout (most significant first):
///
/// ```text
/// | volume 63:56 | boundary 55:48 | layer 47:40 | approach 39:32 | sensitive 31:16 | channel 15:0 |
/// ```
///
/// Every field is read through its own mask/shift pair. Ordering is the
/// ordering of the raw packed integer, which makes the type usable as an
/// ordered map key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GeometryId(GeoIdValue);

impl GeometryId {
    pub const VOLUME_MASK: GeoIdValue = 0xff00_0000_0000_0000;
    pub const VOLUME_SHIFT: GeoIdValue = 56;
    pub const BOUNDARY_MASK: GeoIdValue = 0x00ff_0000_0000_0000;
    pub const BOUNDARY_SHIFT: GeoIdValue = 48;
    pub const LAYER_MASK: GeoIdValue = 0x0000_ff00_0000_0000;
    pub const LAYER_SHIFT: GeoIdValue = 40;
    pub const APPROACH_MASK: GeoIdValue = 0x0000_00ff_0000_0000;
    pub const APPROACH_SHIFT: GeoIdValue = 32;
    pub const SENSITIVE_MASK: GeoIdValue = 0x0000_0000_ffff_0000;
    pub const SENSITIVE_SHIFT: GeoIdValue = 16;
    pub const CHANNEL_MASK: GeoIdValue = 0x0000_0000_0000_ffff;
    pub const CHANNEL_SHIFT: GeoIdValue = 0;

    /// Create an identifier from a ready-made value.
    pub const fn new(value: GeoIdValue) -> Self {
        Self(value)
    }

    /// Return the raw value if `mask` is zero, otherwise the masked and
    /// shifted field.
    #[inline]
    pub fn value(&self, mask: GeoIdValue, shift: GeoIdValue) -> GeoIdValue {
        if mask != 0 {
            (self.0 & mask) >> shift
        } else {
            self.0
        }
    }

    /// The full packed value.
    #[inline]
    pub fn raw(&self) -> GeoIdValue {
        self.0
    }

    pub fn volume(&self) -> GeoIdValue {
        self.value(Self::VOLUME_MASK, Self::VOLUME_SHIFT)
    }

    pub fn boundary(&self) -> GeoIdValue {
        self.value(Self::BOUNDARY_MASK, Self::BOUNDARY_SHIFT)
    }

    pub fn layer(&self) -> GeoIdValue {
        self.value(Self::LAYER_MASK, Self::LAYER_SHIFT)
    }

    pub fn approach(&self) -> GeoIdValue {
        self.value(Self::APPROACH_MASK, Self::APPROACH_SHIFT)
    }

    pub fn sensitive(&self) -> GeoIdValue {
        self.value(Self::SENSITIVE_MASK, Self::SENSITIVE_SHIFT)
    }

    pub fn channel(&self) -> GeoIdValue {
        self.value(Self::CHANNEL_MASK, Self::CHANNEL_SHIFT)
    }

    /// Place `field` into the bit range selected by `mask`/`shift`.
    ///
    /// Bits of `field` that fall outside the mask are dropped. The result is
    /// meant to be accumulated with `+=`.
    #[inline]
    pub fn encode(field: GeoIdValue, mask: GeoIdValue, shift: GeoIdValue) -> GeoIdValue {
        (field << shift) & mask
    }
}

impl From<GeoIdValue> for GeometryId {
    fn from(value: GeoIdValue) -> Self {
        Self(value)
    }
}

/// Raw integer add, used to assemble identifiers while building the geometry.
impl AddAssign<GeometryId> for GeometryId {
    fn add_assign(&mut self, rhs: GeometryId) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl AddAssign<GeoIdValue> for GeometryId {
    fn add_assign(&mut self, rhs: GeoIdValue) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl std::fmt::Display for GeometryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vol={} | bnd={} | lay={} | app={} | sen={} | ch={}",
            self.volume(),
            self.boundary(),
            self.layer(),
            self.approach(),
            self.sensitive(),
            self.channel()
        )
    }
}

// ============================================================================
// IDENTIFIER (Source link)
// ============================================================================

/// Minimal opaque identifier for measurement sources.
///
/// The default value is the all-ones sentinel, which is not valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(u64);

impl Identifier {
    const MAX_VALUE: u64 = u64::MAX;

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// True unless the identifier still holds the sentinel value.
    pub fn is_valid(&self) -> bool {
        self.0 != Self::MAX_VALUE
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self(Self::MAX_VALUE)
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl BitOrAssign<u64> for Identifier {
    fn bitor_assign(&mut self, rhs: u64) {
        self.0 |= rhs;
    }
}

impl BitAndAssign<u64> for Identifier {
    fn bitand_assign(&mut self, rhs: u64) {
        self.0 &= rhs;
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{:#018x}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FIELDS: [(GeoIdValue, GeoIdValue); 6] = [
        (GeometryId::VOLUME_MASK, GeometryId::VOLUME_SHIFT),
        (GeometryId::BOUNDARY_MASK, GeometryId::BOUNDARY_SHIFT),
        (GeometryId::LAYER_MASK, GeometryId::LAYER_SHIFT),
        (GeometryId::APPROACH_MASK, GeometryId::APPROACH_SHIFT),
        (GeometryId::SENSITIVE_MASK, GeometryId::SENSITIVE_SHIFT),
        (GeometryId::CHANNEL_MASK, GeometryId::CHANNEL_SHIFT),
    ];

    #[test]
    fn test_value_without_mask_is_raw() {
        let id = GeometryId::new(0x0102_0304_0506_0708);
        assert_eq!(id.value(0, 0), 0x0102_0304_0506_0708);
        assert_eq!(id.value(0, 17), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_field_accessors() {
        let id = GeometryId::new(0x0102_0304_0506_0708);
        assert_eq!(id.volume(), 0x01);
        assert_eq!(id.boundary(), 0x02);
        assert_eq!(id.layer(), 0x03);
        assert_eq!(id.approach(), 0x04);
        assert_eq!(id.sensitive(), 0x0506);
        assert_eq!(id.channel(), 0x0708);
    }

    #[test]
    fn test_masks_are_disjoint_and_cover_all_bits() {
        let mut union = 0u64;
        for (mask, _) in FIELDS {
            assert_eq!(union & mask, 0);
            union |= mask;
        }
        assert_eq!(union, u64::MAX);
    }

    #[test]
    fn test_accumulate_during_build() {
        let mut id = GeometryId::default();
        id += GeometryId::encode(3, GeometryId::VOLUME_MASK, GeometryId::VOLUME_SHIFT);
        id += GeometryId::encode(7, GeometryId::LAYER_MASK, GeometryId::LAYER_SHIFT);
        id += GeometryId::new(GeometryId::encode(
            12,
            GeometryId::SENSITIVE_MASK,
            GeometryId::SENSITIVE_SHIFT,
        ));

        assert_eq!(id.volume(), 3);
        assert_eq!(id.layer(), 7);
        assert_eq!(id.sensitive(), 12);
        assert_eq!(id.boundary(), 0);
        assert_eq!(id.to_string(), "vol=3 | bnd=0 | lay=7 | app=0 | sen=12 | ch=0");
    }

    #[test]
    fn test_serializes_as_raw_integer() {
        let id = GeometryId::new(0xff00_0000_0000_0001);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, u64::to_string(&0xff00_0000_0000_0001));
        let back: GeometryId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_identifier_sentinel() {
        let mut id = Identifier::default();
        assert!(!id.is_valid());
        assert_eq!(id.to_string(), "invalid");

        id &= 0x00ff;
        assert!(id.is_valid());
        assert_eq!(id.value(), 0x00ff);

        id |= 0xff00;
        assert_eq!(id.value(), 0xffff);
        assert!(Identifier::new(1) < Identifier::new(2));
    }

    proptest! {
        #[test]
        fn prop_field_unaffected_by_add_in_other_field(
            raw in any::<u64>(),
            field in 0usize..6,
            other in 0usize..6,
            add in any::<u64>(),
        ) {
            prop_assume!(field != other);
            let (mask, shift) = FIELDS[field];
            let (other_mask, other_shift) = FIELDS[other];

            // Addend field starts empty so the add cannot carry out of it.
            let mut id = GeometryId::new(raw & !other_mask);
            let before = id.value(mask, shift);
            id += add & other_mask;

            prop_assert_eq!(id.value(mask, shift), before);
            prop_assert_eq!(id.value(other_mask, other_shift), (add & other_mask) >> other_shift);
        }

        #[test]
        fn prop_ordering_matches_raw(a in any::<u64>(), b in any::<u64>()) {
            let (ia, ib) = (GeometryId::new(a), GeometryId::new(b));
            prop_assert_eq!(ia < ib, a < b);
            prop_assert_eq!(ia <= ib, a <= b);
            prop_assert_eq!(ia > ib, a > b);
            prop_assert_eq!(ia >= ib, a >= b);
        }
    }
}
