pub mod chunker;
pub mod corpus;
pub mod extractor;
