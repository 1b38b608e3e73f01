//! Translation of raw provider notifications into [`ChangeEvent`]s.

use crate::namespace::{AbsoluteId, RawChangeCode, RawNotification};
use thiserror::Error;

/// A change to the namespace, abstracted from provider codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// An entry appeared.
    Added(AbsoluteId),
    /// An entry was renamed or moved.
    Renamed {
        /// Identifier before the rename.
        from: AbsoluteId,
        /// Identifier after the rename.
        to: AbsoluteId,
    },
    /// Attributes or contents of an entry changed.
    Modified(AbsoluteId),
    /// Something below a folder changed; the provider did not say what.
    DirectoryContentsChanged(AbsoluteId),
    /// An entry went away.
    Removed(AbsoluteId),
}

impl ChangeEvent {
    /// The identifier the event is primarily about.
    pub fn id(&self) -> &AbsoluteId {
        match self {
            ChangeEvent::Added(id)
            | ChangeEvent::Modified(id)
            | ChangeEvent::DirectoryContentsChanged(id)
            | ChangeEvent::Removed(id) => id,
            ChangeEvent::Renamed { from, .. } => from,
        }
    }
}

/// A raw notification that could not be translated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnrecognizedEvent {
    /// The provider used a code this crate does not know.
    #[error("unrecognized change code {code} for {id}")]
    UnknownCode {
        /// Raw provider code.
        code: u32,
        /// Item the notification was about.
        id: AbsoluteId,
    },

    /// A rename arrived without its new identifier.
    #[error("rename of {0} is missing its target")]
    MissingRenameTarget(AbsoluteId),
}

impl TryFrom<RawNotification> for ChangeEvent {
    type Error = UnrecognizedEvent;

    fn try_from(raw: RawNotification) -> Result<Self, Self::Error> {
        let RawNotification {
            code,
            primary,
            secondary,
            ..
        } = raw;

        match code {
            RawChangeCode::Create
            | RawChangeCode::MkDir
            | RawChangeCode::DriveAdd
            | RawChangeCode::MediaInserted => Ok(ChangeEvent::Added(primary)),
            RawChangeCode::Delete
            | RawChangeCode::RmDir
            | RawChangeCode::DriveRemoved
            | RawChangeCode::MediaRemoved => Ok(ChangeEvent::Removed(primary)),
            RawChangeCode::RenameItem | RawChangeCode::RenameFolder => match secondary {
                Some(to) => Ok(ChangeEvent::Renamed { from: primary, to }),
                None => Err(UnrecognizedEvent::MissingRenameTarget(primary)),
            },
            RawChangeCode::UpdateItem | RawChangeCode::Attributes => {
                Ok(ChangeEvent::Modified(primary))
            }
            RawChangeCode::UpdateDir => Ok(ChangeEvent::DirectoryContentsChanged(primary)),
            RawChangeCode::Other(code) => Err(UnrecognizedEvent::UnknownCode { code, id: primary }),
        }
    }
}
