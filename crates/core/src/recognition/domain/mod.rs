pub mod face_encoder;
pub mod face_scorer;
pub mod match_verdict;
pub mod reference_set;
