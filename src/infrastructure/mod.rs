pub mod extractor;
pub mod queue;
pub mod storage;
pub mod validator;
