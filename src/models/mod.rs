pub mod direction;
pub mod lesson;
pub mod update;

pub use direction::{Direction, DirectionRef};
pub use lesson::{
    BlockKind, ContentBlock, Lesson, LessonContent, ReportedStatus, StatusKind, UserStatus,
};
pub use update::{LessonUpdate, UpdateAction, UserActivity};
