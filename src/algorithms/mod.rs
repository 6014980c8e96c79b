pub mod factorization;
pub mod tfidf;

pub use factorization::{FactorModel, MatrixFactorization};
pub use tfidf::{build_tour_vectors, tokenize, user_content_vector};
