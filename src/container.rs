/*!
The precompiled effect container.

A container is one immutable byte buffer:

```text
| header | unstructured blob (cb_unstructured bytes) | structured section (rest) |
```

The header carries a format tag and per-category counts. The unstructured blob holds every
variable-length payload (strings, default values, shader bytecode, type records) and is only
ever addressed by offset. The structured section is a sequence of fixed-size records read
front to back: constant buffers with their numeric variables, object variables, interface
variables, then groups, techniques, passes and their assignments.

[`reader::Reader`] provides bounds-checked access to both sections, and
[`builder::ContainerBuilder`] writes containers in the same layout.
*/

pub mod builder;
pub mod reader;

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

/// Marks an absent optional offset, bind point, or binding.
pub const NONE: u32 = 0xFFFF_FFFF;

/// A supported container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatVersion {
    Fx4_0,
    Fx4_1,
    Fx5_0,
}

/// One row of the supported-version table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionEntry {
    pub name: &'static str,
    pub version: u32,
    pub tag: u32,
    pub format: FormatVersion,
}

/// Supported versions, in ascending order.
pub const SUPPORTED_VERSIONS: [VersionEntry; 3] = [
    VersionEntry {
        name: "fx_4_0",
        version: 0x0400,
        tag: 0xFEFF_1001,
        format: FormatVersion::Fx4_0,
    },
    VersionEntry {
        name: "fx_4_1",
        version: 0x0401,
        tag: 0xFEFF_1011,
        format: FormatVersion::Fx4_1,
    },
    VersionEntry {
        name: "fx_5_0",
        version: 0x0500,
        tag: 0xFEFF_2001,
        format: FormatVersion::Fx5_0,
    },
];

impl FormatVersion {
    pub fn from_tag(tag: u32) -> Result<Self> {
        SUPPORTED_VERSIONS
            .iter()
            .find(|entry| entry.tag == tag)
            .map(|entry| entry.format)
            .ok_or_else(|| Error::format(format!("unsupported container tag {tag:#010x}")))
    }

    pub fn entry(self) -> &'static VersionEntry {
        // the table is indexed in declaration order
        &SUPPORTED_VERSIONS[self as usize]
    }

    pub fn tag(self) -> u32 {
        self.entry().tag
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Whether this format carries groups and interface variables.
    pub fn has_groups(self) -> bool {
        self >= FormatVersion::Fx5_0
    }

    pub fn header_size(self) -> usize {
        if self.has_groups() {
            size_of::<RawHeader>() + size_of::<RawHeaderExtension>()
        } else {
            size_of::<RawHeader>()
        }
    }
}

/// The header shared by every version, exactly as it appears on disk.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct RawHeader {
    pub(crate) tag: u32,
    pub(crate) cb_unstructured: u32,
    pub(crate) constant_buffers: u32,
    pub(crate) numeric_variables: u32,
    pub(crate) object_variables: u32,
    pub(crate) techniques: u32,
    pub(crate) passes: u32,
    pub(crate) strings: u32,
    pub(crate) shaders: u32,
    pub(crate) blend_states: u32,
    pub(crate) depth_stencil_states: u32,
    pub(crate) rasterizer_states: u32,
    pub(crate) samplers: u32,
}

/// Fields appended by `fx_5_0`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct RawHeaderExtension {
    pub(crate) groups: u32,
    pub(crate) interface_variables: u32,
}

impl RawHeader {
    pub(crate) fn from_le(self) -> Self {
        let mut words: [u32; 13] = bytemuck::cast(self);
        for word in &mut words {
            *word = u32::from_le(*word);
        }
        bytemuck::cast(words)
    }
}

impl RawHeaderExtension {
    pub(crate) fn from_le(self) -> Self {
        Self {
            groups: u32::from_le(self.groups),
            interface_variables: u32::from_le(self.interface_variables),
        }
    }
}

/// Per-category counts declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderCounts {
    pub constant_buffers: u32,
    pub numeric_variables: u32,
    pub object_variables: u32,
    pub interface_variables: u32,
    pub groups: u32,
    pub techniques: u32,
    pub passes: u32,
    pub strings: u32,
    pub shaders: u32,
    pub blend_states: u32,
    pub depth_stencil_states: u32,
    pub rasterizer_states: u32,
    pub samplers: u32,
}

impl HeaderCounts {
    pub fn variables(&self) -> Result<u32> {
        crate::bittricks::checked_add(
            crate::bittricks::checked_add(
                self.numeric_variables,
                self.object_variables,
                "variable count",
            )?,
            self.interface_variables,
            "variable count",
        )
    }

    /// Total number of blocks of every kind, inline shaders included.
    pub fn blocks(&self) -> Result<u32> {
        [
            self.blend_states,
            self.depth_stencil_states,
            self.rasterizer_states,
            self.samplers,
        ]
        .into_iter()
        .try_fold(self.shaders, |sum, count| {
            crate::bittricks::checked_add(sum, count, "block count")
        })
    }
}

/// A validated container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format: FormatVersion,
    pub cb_unstructured: u32,
    pub counts: HeaderCounts,
}

impl Header {
    pub(crate) fn from_raw(raw: RawHeader, extension: Option<RawHeaderExtension>) -> Result<Self> {
        let format = FormatVersion::from_tag(raw.tag)?;
        let (groups, interface_variables) = match extension {
            Some(extension) => (extension.groups, extension.interface_variables),
            // 4.x containers have a single anonymous group
            None => (1, 0),
        };
        Ok(Header {
            format,
            cb_unstructured: raw.cb_unstructured,
            counts: HeaderCounts {
                constant_buffers: raw.constant_buffers,
                numeric_variables: raw.numeric_variables,
                object_variables: raw.object_variables,
                interface_variables,
                groups,
                techniques: raw.techniques,
                passes: raw.passes,
                strings: raw.strings,
                shaders: raw.shaders,
                blend_states: raw.blend_states,
                depth_stencil_states: raw.depth_stencil_states,
                rasterizer_states: raw.rasterizer_states,
                samplers: raw.samplers,
            },
        })
    }

    pub(crate) fn to_raw(self) -> (RawHeader, Option<RawHeaderExtension>) {
        let counts = self.counts;
        let raw = RawHeader {
            tag: self.format.tag(),
            cb_unstructured: self.cb_unstructured,
            constant_buffers: counts.constant_buffers,
            numeric_variables: counts.numeric_variables,
            object_variables: counts.object_variables,
            techniques: counts.techniques,
            passes: counts.passes,
            strings: counts.strings,
            shaders: counts.shaders,
            blend_states: counts.blend_states,
            depth_stencil_states: counts.depth_stencil_states,
            rasterizer_states: counts.rasterizer_states,
            samplers: counts.samplers,
        };
        let extension = self.format.has_groups().then_some(RawHeaderExtension {
            groups: counts.groups,
            interface_variables: counts.interface_variables,
        });
        (raw, extension)
    }
}

/// How an assignment's right-hand side is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RhsKind {
    Constant = 1,
    Variable = 2,
    ConstIndex = 3,
    VariableIndex = 4,
    InlineShader = 5,
}

impl RhsKind {
    pub fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => RhsKind::Constant,
            2 => RhsKind::Variable,
            3 => RhsKind::ConstIndex,
            4 => RhsKind::VariableIndex,
            5 => RhsKind::InlineShader,
            other => {
                return Err(Error::format(format!(
                    "unsupported assignment source kind {other}"
                )));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_table_is_ascending() {
        for pair in SUPPORTED_VERSIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
            assert!(pair[0].format < pair[1].format);
        }
        for entry in SUPPORTED_VERSIONS {
            assert_eq!(entry.format.entry(), &entry);
        }
    }

    #[test]
    fn unknown_tag_is_invalid_format() {
        assert!(matches!(
            FormatVersion::from_tag(0xDEAD_BEEF),
            Err(Error::InvalidFormat { .. })
        ));
        assert_eq!(FormatVersion::from_tag(0xFEFF_2001), Ok(FormatVersion::Fx5_0));
    }

    #[test]
    fn header_sizes() {
        assert_eq!(FormatVersion::Fx4_0.header_size(), 52);
        assert_eq!(FormatVersion::Fx5_0.header_size(), 60);
    }

    #[test]
    fn legacy_header_has_one_group() {
        let raw = RawHeader {
            tag: FormatVersion::Fx4_1.tag(),
            ..Zeroable::zeroed()
        };
        let header = Header::from_raw(raw, None).unwrap();
        assert_eq!(header.counts.groups, 1);
        assert_eq!(header.counts.interface_variables, 0);
    }
}
