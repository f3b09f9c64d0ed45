//! Status enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table, and its label is the
//! snake_case name used on the wire.

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Wire label.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        concat!("Unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Project lifecycle status.
    ProjectStatus {
        Draft = 1 => "draft",
        Processing = 2 => "processing",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
        Paused = 5 => "paused",
    }
}

define_status_enum! {
    /// Per-(project, stage) execution status.
    StageStatus {
        Pending = 1 => "pending",
        Processing = 2 => "processing",
        Completed = 3 => "completed",
        /// Terminal: some units succeeded and some failed.
        PartiallyCompleted = 4 => "partially_completed",
        Failed = 5 => "failed",
        Skipped = 6 => "skipped",
    }
}

define_status_enum! {
    /// Generation status of a single image or video attempt.
    AssetStatus {
        Pending = 1 => "pending",
        Processing = 2 => "processing",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
    }
}

impl StageStatus {
    /// Forward transitions permitted outside of rollback.
    ///
    /// `Completed` never moves back to `Processing`; the only way out of it
    /// is [`StageStatus::can_roll_back`] followed by a reset to `Pending`.
    /// The retry bound on `Failed -> Processing` needs the record itself and
    /// is applied by [`crate::records::StageRecord::check_claimable`].
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Skipped)
                | (Skipped, Processing)
                | (Processing, Completed)
                | (Processing, PartiallyCompleted)
                | (Processing, Failed)
                | (Failed, Processing)
                | (PartiallyCompleted, Processing)
        )
    }

    /// A stage can be reset to `Pending` unless it is currently running.
    pub fn can_roll_back(self) -> bool {
        self != StageStatus::Processing
    }

    /// Whether a downstream stage may consume this stage's output.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::PartiallyCompleted)
    }

    /// Whether a run has finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::PartiallyCompleted | StageStatus::Failed
        )
    }
}

impl ProjectStatus {
    /// Pause is only meaningful while work is running.
    pub fn can_pause(self) -> bool {
        self == ProjectStatus::Processing
    }

    pub fn can_resume(self) -> bool {
        self == ProjectStatus::Paused
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
