#![forbid(unsafe_code)]
//! Structural and per-role validation of a decoded superblock.
//!
//! [`Superblock::issues`] yields every violated rule as a lazy iterator, in
//! a fixed order: magic, checksum, version, size, block size, cache mode,
//! then the role's extent rules. Callers drain it to collect everything
//! (the dump tool) or stop at the first item (the coordinator).

use std::fmt;
use zc_lexicon::{BlockSizeIssue, block_size_issues};
use zc_types::{CacheMode, ComponentRole, Role, ZC_SB_MAGIC, ZC_SB_SIZE, ZC_SB_VERSION};

use crate::superblock::Superblock;

/// Which half of an extent pair a rule is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentField {
    Offset,
    Size,
}

impl ExtentField {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Offset => "offset",
            Self::Size => "size",
        }
    }
}

/// A single violated validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issue {
    Magic,
    Checksum,
    Version,
    Size,
    BlockSize(BlockSizeIssue),
    CacheMode,
    /// The role requires this extent field to be set, but it is zero.
    ExtentUnset {
        role: Role,
        component: ComponentRole,
        field: ExtentField,
    },
    /// The role forbids this extent, but the field is non-zero.
    ExtentSet {
        role: Role,
        component: ComponentRole,
        field: ExtentField,
    },
    Role,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Magic => f.write_str("incorrect magic number"),
            Self::Checksum => f.write_str("incorrect superblock checksum"),
            Self::Version => f.write_str("incorrect superblock version"),
            Self::Size => f.write_str("incorrect superblock size"),
            Self::BlockSize(issue) => fmt::Display::fmt(issue, f),
            Self::CacheMode => f.write_str("invalid cache mode"),
            Self::ExtentUnset {
                role,
                component,
                field,
            } => write!(
                f,
                "{component} {} not set for {}",
                field.as_str(),
                role.device_noun()
            ),
            Self::ExtentSet {
                role,
                component,
                field,
            } => write!(
                f,
                "non-zero {component} {} for {}",
                field.as_str(),
                role.device_noun()
            ),
            Self::Role => f.write_str("invalid device role"),
        }
    }
}

/// Extents a role's superblock must describe; every other pair must be zero.
#[must_use]
pub const fn role_extents(role: Role) -> &'static [ComponentRole] {
    match role {
        Role::Origin => &[ComponentRole::Origin],
        Role::Cache => &[ComponentRole::Cache],
        Role::Metadata => &[ComponentRole::Metadata],
        Role::Combined => &[ComponentRole::Cache, ComponentRole::Metadata],
    }
}

type Rule = fn(&Superblock) -> Option<Issue>;

const HEADER_RULES: [Rule; 4] = [
    |sb| (sb.magic != ZC_SB_MAGIC).then_some(Issue::Magic),
    |sb| (sb.checksum != sb.compute_checksum()).then_some(Issue::Checksum),
    |sb| (sb.version != ZC_SB_VERSION).then_some(Issue::Version),
    |sb| (sb.size != ZC_SB_SIZE as u64).then_some(Issue::Size),
];

fn cache_mode_issue(sb: &Superblock) -> Option<Issue> {
    CacheMode::from_code(sb.cache_mode)
        .is_none()
        .then_some(Issue::CacheMode)
}

fn extent_issues(sb: &Superblock, role: Role) -> impl Iterator<Item = Issue> + '_ {
    let wanted = role_extents(role);
    ComponentRole::ALL.into_iter().flat_map(move |component| {
        let expected = wanted.contains(&component);
        let extent = sb.extent(component);
        [
            (ExtentField::Offset, extent.offset),
            (ExtentField::Size, extent.size),
        ]
        .into_iter()
        .filter_map(move |(field, value)| match (expected, value == 0) {
            (true, true) => Some(Issue::ExtentUnset {
                role,
                component,
                field,
            }),
            (false, false) => Some(Issue::ExtentSet {
                role,
                component,
                field,
            }),
            _ => None,
        })
    })
}

fn role_issues(sb: &Superblock) -> impl Iterator<Item = Issue> + '_ {
    let role = Role::from_code(sb.role);
    let unknown = role.is_none().then_some(Issue::Role);
    role.into_iter()
        .flat_map(move |role| extent_issues(sb, role))
        .chain(unknown)
}

impl Superblock {
    /// Every violated rule, produced lazily in evaluation order.
    pub fn issues(&self) -> impl Iterator<Item = Issue> + '_ {
        let header = HEADER_RULES.into_iter().filter_map(move |rule| rule(self));
        let block_size = std::iter::once(self.block_size)
            .flat_map(block_size_issues)
            .map(Issue::BlockSize);
        let cache_mode = std::iter::once(self).filter_map(cache_mode_issue);
        let role = std::iter::once(self).flat_map(role_issues);

        header.chain(block_size).chain(cache_mode).chain(role)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zc_types::{Extent, SetId};

    fn sealed(role: Role, extents: &[(ComponentRole, Extent)]) -> Superblock {
        let mut sb = Superblock::new(
            role,
            SetId::from_bytes([7; 16]),
            253,
            262_144,
            CacheMode::Writethrough,
        );
        for (component, extent) in extents {
            sb = sb.with_extent(*component, *extent);
        }
        sb.sealed()
    }

    #[test]
    fn valid_record_has_no_issues() {
        let sb = sealed(
            Role::Origin,
            &[(ComponentRole::Origin, Extent::new(4096, 1 << 30))],
        );
        assert!(sb.is_valid());
        assert_eq!(sb.issues().count(), 0);
    }

    #[test]
    fn issue_messages() {
        let unset = Issue::ExtentUnset {
            role: Role::Combined,
            component: ComponentRole::Metadata,
            field: ExtentField::Size,
        };
        assert_eq!(
            unset.to_string(),
            "metadata size not set for combined cache device"
        );

        let set = Issue::ExtentSet {
            role: Role::Origin,
            component: ComponentRole::Cache,
            field: ExtentField::Offset,
        };
        assert_eq!(set.to_string(), "non-zero cache offset for origin device");
        assert_eq!(Issue::Role.to_string(), "invalid device role");
    }

    #[test]
    fn unknown_role_is_reported_last() {
        let mut sb = sealed(
            Role::Origin,
            &[(ComponentRole::Origin, Extent::new(4096, 1 << 30))],
        );
        sb.role = 4;
        sb.seal();
        assert_eq!(sb.issues().collect::<Vec<_>>(), vec![Issue::Role]);
    }

    #[test]
    fn caller_can_stop_early() {
        let mut sb = Superblock::from_words([0; zc_types::ZC_SB_WORDS]);
        sb.checksum = 1;
        let first = sb.issues().next();
        assert_eq!(first, Some(Issue::Magic));
        assert!(sb.issues().count() > 3);
    }
}
