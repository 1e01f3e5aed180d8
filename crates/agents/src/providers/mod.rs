pub mod openai_compat;

pub use openai_compat::OpenAiCompatModel;
