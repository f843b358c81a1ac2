mod engine;
mod error;
mod plane;
mod replay;
mod request;
mod response;

pub use engine::{NoopOcrEngine, OcrEngine, TextDetector};
pub use error::OcrError;
pub use plane::LumaPlane;
pub use replay::ReplayOcrEngine;
pub use request::OcrRequest;
pub use response::{OcrResponse, OcrText};
