//! View creation for the registration stages
//!
//! Every call mints a fresh view id in the target bucket. Re-running a
//! view stage therefore creates a new view instead of redefining the old
//! one.

use tracing::info;

use neurosim_core::{
    Bucket, EntityType, SimilarityResult, ViewDefinition, ViewMapping, ViewRef, ViewService,
};

fn create(
    views: &dyn ViewService,
    bucket: &Bucket,
    definition: ViewDefinition,
) -> SimilarityResult<String> {
    let view_id = bucket.mint_view_id();
    let created = views.create_view(bucket, &view_id, &definition)?;
    info!(
        target: "neurosim::pipeline",
        view = %created,
        bucket = %bucket,
        resource_type = %definition.resource_type,
        tag = %definition.tag,
        "Created view"
    );
    Ok(created)
}

/// View over the embeddings tagged `tag`, mapped for `dimension`
pub fn create_similarity_view(
    views: &dyn ViewService,
    bucket: &Bucket,
    tag: &str,
    dimension: usize,
) -> SimilarityResult<String> {
    create(
        views,
        bucket,
        ViewDefinition::new(EntityType::Embedding, tag, ViewMapping::for_dimension(dimension)),
    )
}

/// View over the boosting factors tagged `tag`
pub fn create_boosting_view(
    views: &dyn ViewService,
    bucket: &Bucket,
    tag: &str,
) -> SimilarityResult<String> {
    create(
        views,
        bucket,
        ViewDefinition::new(EntityType::SimilarityBoostingFactor, tag, ViewMapping::BoostingFactor),
    )
}

/// View over the statistics tagged `tag`
pub fn create_stats_view(
    views: &dyn ViewService,
    bucket: &Bucket,
    tag: &str,
) -> SimilarityResult<String> {
    create(
        views,
        bucket,
        ViewDefinition::new(EntityType::ElasticSearchViewStatistics, tag, ViewMapping::Statistics),
    )
}

/// View over the union of `members`, created in `bucket`
pub fn create_aggregated_view(
    views: &dyn ViewService,
    bucket: &Bucket,
    members: &[ViewRef],
) -> SimilarityResult<String> {
    let view_id = bucket.mint_view_id();
    let created = views.create_aggregated_view(bucket, &view_id, members)?;
    info!(
        target: "neurosim::pipeline",
        view = %created,
        bucket = %bucket,
        members = members.len(),
        "Created aggregated view"
    );
    Ok(created)
}
