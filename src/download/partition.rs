//! Dimension partitioning.
//!
//! A job whose heavy dimension is longer than the page size is split into
//! page-sized children once. Children carry their partition as
//! `overrideDimensions`, which suppresses any further split, so the fold
//! never recurses more than one level.

use crate::constants::dimensions;
use crate::error::{MigratorError, MigratorResult};
use crate::models::{DimensionSet, ItemConfig, ItemType};

/// What a download job should do with its dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPlan {
    /// Fetch this dimension set directly
    Fetch(DimensionSet),
    /// Republish one child per partition and fetch nothing
    Partition(Vec<DimensionSet>),
}

/// Dimensions of one `(period, item)` slice before any override
pub fn base_dimensions(item: &ItemConfig, period: &str) -> DimensionSet {
    let mut set = DimensionSet::new();
    for (name, values) in &item.dimensions {
        set.insert(name.clone(), values.clone());
    }

    let mut data_items: Vec<String> = Vec::new();
    for mapping in &item.data_items {
        if !data_items.contains(&mapping.source_id) {
            data_items.push(mapping.source_id.clone());
        }
    }
    set.insert(dimensions::DATA, data_items);
    set.insert(dimensions::PERIOD, vec![period.to_string()]);
    set.insert(dimensions::ORG_UNIT, item.org_units.clone());

    if let (ItemType::AttributeCombo, Some(attribute)) = (item.item_type, &item.attribute_dimension) {
        let options = item
            .attribute_mappings
            .iter()
            .map(|mapping| mapping.source_id.clone())
            .collect();
        set.insert(attribute.clone(), options);
    }

    for (name, values) in &item.filters {
        set.insert_filter(name.clone(), values.clone());
    }
    set
}

/// The dimension to paginate
///
/// `dx` when paginating by data item (it must be present), otherwise the
/// longest dimension; ties go to the first name in order.
pub fn heavy_dimension(set: &DimensionSet, paginate_by_data: bool) -> MigratorResult<String> {
    if paginate_by_data {
        return match set.get(dimensions::DATA) {
            Some(values) if !values.is_empty() => Ok(dimensions::DATA.to_string()),
            _ => Err(MigratorError::malformed(
                "paginateByData requires a populated dx dimension",
            )),
        };
    }

    let mut heaviest: Option<(&String, usize)> = None;
    for (name, values) in set.dimensions() {
        if heaviest.map_or(true, |(_, len)| values.len() > len) {
            heaviest = Some((name, values.len()));
        }
    }
    heaviest
        .map(|(name, _)| name.clone())
        .ok_or_else(|| MigratorError::malformed("download job has no dimensions"))
}

/// Split `heavy` into `page_size` chunks, keeping every other dimension
pub fn partition(set: &DimensionSet, heavy: &str, page_size: usize) -> Vec<DimensionSet> {
    let page_size = page_size.max(1);
    match set.get(heavy) {
        Some(values) if values.len() > page_size => values
            .chunks(page_size)
            .map(|chunk| {
                let mut child = set.clone();
                child.insert(heavy.to_string(), chunk.to_vec());
                child
            })
            .collect(),
        _ => vec![set.clone()],
    }
}

/// Decide between fetching and partitioning
pub fn plan(
    base: &DimensionSet,
    override_dimensions: Option<&DimensionSet>,
    page_size: usize,
    paginate_by_data: bool,
) -> MigratorResult<DownloadPlan> {
    if let Some(overrides) = override_dimensions {
        return Ok(DownloadPlan::Fetch(base.overridden_by(overrides)));
    }

    let heavy = heavy_dimension(base, paginate_by_data)?;
    let oversized = base.get(&heavy).map_or(0, <[String]>::len) > page_size.max(1);
    if oversized {
        Ok(DownloadPlan::Partition(partition(base, &heavy, page_size)))
    } else {
        Ok(DownloadPlan::Fetch(base.clone()))
    }
}
