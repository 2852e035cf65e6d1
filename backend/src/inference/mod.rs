pub mod anxiety;
pub mod artifacts;
pub mod depression;
pub mod face;
pub mod runtime;
pub mod stress;
pub mod suggestion;

#[cfg(test)]
pub mod testing;

pub use anxiety::AnxietyModel;
pub use depression::DepressionModel;
pub use face::FaceExpressionModel;
pub use stress::StressModel;
pub use suggestion::SuggestionModel;
