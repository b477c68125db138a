//! Search criteria vocabulary
//!
//! Every term declares the criteria it requires as a [`Criteria`] set. The
//! bits are partitioned into five [`CriteriaGroup`]s, each evaluated by its
//! own stage in ascending cost order.

use bitflags::bitflags;

bitflags! {
    /// Criteria a search term can require
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Criteria: u32 {
        /// Generic `file[:ads|#ea]` spec, resolved when the term is built
        const NAME = 1 << 0;
        const NAME_EXACT = 1 << 1;
        const NAME_MATCH = 1 << 2;
        const NAME_REGEX = 1 << 3;

        const PATH_EXACT = 1 << 4;
        const PATH_MATCH = 1 << 5;
        const PATH_REGEX = 1 << 6;

        /// Generic ADS name, resolved when the term is built
        const ADS = 1 << 7;
        const ADS_EXACT = 1 << 8;
        const ADS_MATCH = 1 << 9;
        const ADS_REGEX = 1 << 10;

        /// Generic EA name, resolved when the term is built
        const EA = 1 << 11;
        const EA_EXACT = 1 << 12;
        const EA_MATCH = 1 << 13;
        const EA_REGEX = 1 << 14;

        const SIZE_EQ = 1 << 15;
        const SIZE_GT = 1 << 16;
        const SIZE_GE = 1 << 17;
        const SIZE_LT = 1 << 18;
        const SIZE_LE = 1 << 19;

        const DATA_MD5 = 1 << 20;
        const DATA_SHA1 = 1 << 21;
        const DATA_SHA256 = 1 << 22;

        const HEADER = 1 << 23;
        const HEADER_REGEX = 1 << 24;
        const HEADER_HEX = 1 << 25;

        const ATTR_TYPE = 1 << 26;
        const ATTR_NAME_EXACT = 1 << 27;
        const ATTR_NAME_MATCH = 1 << 28;
        const ATTR_NAME_REGEX = 1 << 29;

        const CONTAINS = 1 << 30;
        const YARA = 1 << 31;
    }
}

impl Criteria {
    pub const NAME_MASK: Self = Self::NAME
        .union(Self::NAME_EXACT)
        .union(Self::NAME_MATCH)
        .union(Self::NAME_REGEX);

    pub const PATH_MASK: Self = Self::PATH_EXACT
        .union(Self::PATH_MATCH)
        .union(Self::PATH_REGEX);

    pub const ADS_MASK: Self = Self::ADS
        .union(Self::ADS_EXACT)
        .union(Self::ADS_MATCH)
        .union(Self::ADS_REGEX);

    pub const EA_MASK: Self = Self::EA
        .union(Self::EA_EXACT)
        .union(Self::EA_MATCH)
        .union(Self::EA_REGEX);

    pub const SIZE_MASK: Self = Self::SIZE_EQ
        .union(Self::SIZE_GT)
        .union(Self::SIZE_GE)
        .union(Self::SIZE_LT)
        .union(Self::SIZE_LE);

    pub const ATTR_NAME_MASK: Self = Self::ATTR_NAME_EXACT
        .union(Self::ATTR_NAME_MATCH)
        .union(Self::ATTR_NAME_REGEX);

    pub const HASH_MASK: Self = Self::DATA_MD5
        .union(Self::DATA_SHA1)
        .union(Self::DATA_SHA256);

    pub const HEADER_MASK: Self = Self::HEADER
        .union(Self::HEADER_HEX)
        .union(Self::HEADER_REGEX);

    pub const DATA_NAME_OR_SIZE_MASK: Self = Self::ADS_MASK.union(Self::SIZE_MASK);

    pub const ATTRIBUTE_MASK: Self = Self::ATTR_TYPE
        .union(Self::ATTR_NAME_MASK)
        .union(Self::EA_MASK);

    pub const DATA_MASK: Self = Self::HEADER_MASK
        .union(Self::HASH_MASK)
        .union(Self::CONTAINS)
        .union(Self::YARA);

    pub fn depends_on_name(self) -> bool {
        self.intersects(Self::NAME_MASK)
    }

    pub fn depends_on_path(self) -> bool {
        self.intersects(Self::PATH_MASK)
    }

    pub fn depends_on_data_name_or_size(self) -> bool {
        self.intersects(Self::DATA_NAME_OR_SIZE_MASK)
    }

    pub fn depends_on_attribute(self) -> bool {
        self.intersects(Self::ATTRIBUTE_MASK)
    }

    pub fn depends_on_data(self) -> bool {
        self.intersects(Self::DATA_MASK)
    }

    /// Terms that can be decided from a `$FILE_NAME` alone, without the record
    pub fn depends_only_on_name_or_path(self) -> bool {
        !self.intersects(
            Self::DATA_NAME_OR_SIZE_MASK
                .union(Self::ATTRIBUTE_MASK)
                .union(Self::DATA_MASK),
        )
    }

    /// Bits of this set belonging to `group`
    pub fn in_group(self, group: CriteriaGroup) -> Self {
        self.intersection(group.mask())
    }
}

/// Concern groups, declared in ascending evaluation cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CriteriaGroup {
    Name,
    Path,
    DataNameOrSize,
    Attribute,
    Data,
}

impl CriteriaGroup {
    /// All groups, cheapest first
    pub const BY_COST: [CriteriaGroup; 5] = [
        CriteriaGroup::Name,
        CriteriaGroup::Path,
        CriteriaGroup::DataNameOrSize,
        CriteriaGroup::Attribute,
        CriteriaGroup::Data,
    ];

    pub fn mask(self) -> Criteria {
        match self {
            CriteriaGroup::Name => Criteria::NAME_MASK,
            CriteriaGroup::Path => Criteria::PATH_MASK,
            CriteriaGroup::DataNameOrSize => Criteria::DATA_NAME_OR_SIZE_MASK,
            CriteriaGroup::Attribute => Criteria::ATTRIBUTE_MASK,
            CriteriaGroup::Data => Criteria::DATA_MASK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_partition_all_bits() {
        let mut seen = Criteria::empty();
        for group in CriteriaGroup::BY_COST {
            assert!(!seen.intersects(group.mask()), "{:?} overlaps", group);
            seen |= group.mask();
        }
        assert_eq!(seen, Criteria::all());
    }

    #[test]
    fn bit_positions() {
        assert_eq!(Criteria::NAME_EXACT.bits(), 0x2);
        assert_eq!(Criteria::SIZE_EQ.bits(), 0x8000);
        assert_eq!(Criteria::DATA_SHA256.bits(), 0x40_0000);
        assert_eq!(Criteria::YARA.bits(), 0x8000_0000);
    }

    #[test]
    fn dependency_predicates() {
        let name_and_path = Criteria::NAME_EXACT | Criteria::PATH_MATCH;
        assert!(name_and_path.depends_on_name());
        assert!(name_and_path.depends_on_path());
        assert!(name_and_path.depends_only_on_name_or_path());

        let hashed = Criteria::SIZE_GT | Criteria::DATA_MD5;
        assert!(hashed.depends_on_data_name_or_size());
        assert!(hashed.depends_on_data());
        assert!(!hashed.depends_on_attribute());
        assert!(!hashed.depends_only_on_name_or_path());

        assert!(Criteria::EA_EXACT.depends_on_attribute());
        assert_eq!(hashed.in_group(CriteriaGroup::Data), Criteria::DATA_MD5);
    }
}
