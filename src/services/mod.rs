pub mod recommend;
pub mod top_k;

pub use recommend::{RecommendContext, RecommendationService, Recommender};
pub use top_k::TopKFilter;
