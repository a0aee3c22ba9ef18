//! 记忆层：案例推理（CBR）经验库

pub mod cbr;

pub use cbr::{
    cosine_similarity, ExperienceKind, ExperienceRecord, ExperienceStore, RetrievedCase,
    DEFAULT_LIMIT,
};
