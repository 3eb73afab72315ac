pub mod image;
pub mod openai;

pub use image::{
    GenerationRequest, ImageQuality, ImageSize, RawGenerationRequest, RequestLimits,
    ValidationError,
};
