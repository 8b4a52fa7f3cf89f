/// Operations served by the metadata service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetaOp {
    Heartbeat = 30,
    Create = 31,
    /// Reserved; answered with an "unsupported" status.
    Rename = 32,
    Delete = 33,
    List = 34,
    GetLocations = 35,
    Close = 36,
    GetSize = 37,
    SetSize = 38,
    GetInfo = 39,
    Copy = 40,
    Move = 41,
    Download = 42,
    Open = 43,
}

impl MetaOp {
    pub const ALL: [MetaOp; 14] = [
        Self::Heartbeat,
        Self::Create,
        Self::Rename,
        Self::Delete,
        Self::List,
        Self::GetLocations,
        Self::Close,
        Self::GetSize,
        Self::SetSize,
        Self::GetInfo,
        Self::Copy,
        Self::Move,
        Self::Download,
        Self::Open,
    ];

    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == tag)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Rename)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Create => "create",
            Self::Rename => "rename",
            Self::Delete => "delete",
            Self::List => "list",
            Self::GetLocations => "get-locations",
            Self::Close => "close",
            Self::GetSize => "get-size",
            Self::SetSize => "set-size",
            Self::GetInfo => "get-info",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Download => "download",
            Self::Open => "open",
        }
    }
}

/// Operations served by a block-storage node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataOp {
    Write = 10,
    Read = 11,
    Delete = 12,
    /// Reserved.
    CreateDirectory = 13,
    /// Reserved.
    DeleteDirectory = 14,
    Move = 15,
    GetSize = 16,
    Download = 17,
    Open = 18,
    Copy = 19,
    Create = 20,
}

impl DataOp {
    pub const ALL: [DataOp; 11] = [
        Self::Write,
        Self::Read,
        Self::Delete,
        Self::CreateDirectory,
        Self::DeleteDirectory,
        Self::Move,
        Self::GetSize,
        Self::Download,
        Self::Open,
        Self::Copy,
        Self::Create,
    ];

    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == tag)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Self::CreateDirectory | Self::DeleteDirectory)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::CreateDirectory => "create-directory",
            Self::DeleteDirectory => "delete-directory",
            Self::Move => "move",
            Self::GetSize => "get-size",
            Self::Download => "download",
            Self::Open => "open",
            Self::Copy => "copy",
            Self::Create => "create",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_tags_are_contiguous() {
        for (i, op) in MetaOp::ALL.iter().enumerate() {
            assert_eq!(op.tag(), 30 + i as u8);
            assert_eq!(MetaOp::from_u8(op.tag()), Some(*op));
        }
        assert_eq!(MetaOp::from_u8(29), None);
        assert_eq!(MetaOp::from_u8(44), None);
    }

    #[test]
    fn data_tags_are_contiguous() {
        for (i, op) in DataOp::ALL.iter().enumerate() {
            assert_eq!(op.tag(), 10 + i as u8);
            assert_eq!(DataOp::from_u8(op.tag()), Some(*op));
        }
        assert_eq!(DataOp::from_u8(9), None);
        assert_eq!(DataOp::from_u8(21), None);
    }

    #[test]
    fn reserved_ops() {
        assert!(MetaOp::Rename.is_reserved());
        assert!(!MetaOp::Move.is_reserved());
        assert!(DataOp::CreateDirectory.is_reserved());
        assert!(DataOp::DeleteDirectory.is_reserved());
        assert!(!DataOp::Copy.is_reserved());
    }
}
