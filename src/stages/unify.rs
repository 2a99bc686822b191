//! Schema unification: per-language name columns become numbered name slots
//! with a paired language column.

use tracing::debug;

use crate::error::Result;
use crate::io::{save, SourceResolver, StageArea};
use crate::models::{lang_column, AdminLevel, Country, FeatureLayer, SchemaDescriptor, Value};
use crate::pipeline::PipelineContext;

/// Rename `adm<L>_<xx>` columns to `adm<L>_name<N>` and add `lang<N>`.
///
/// Languages come from the layer's own `adm<level>_xx` columns, numbered in
/// column order after any slots the layer already has; matching columns of
/// coarser levels are renamed into the same slots. Running it again on its
/// own output changes nothing.
pub fn refactor_columns(layer: &mut FeatureLayer, level: AdminLevel) -> Result<()> {
    layer.lowercase_columns();
    let schema = SchemaDescriptor::describe(layer.columns());
    let languages = schema.languages(level.get());
    let offset = schema.slot_count();

    for (i, lang) in languages.iter().enumerate() {
        let slot = offset + i;
        for l in level.descending() {
            let source = format!("adm{}_{}", l.get(), lang);
            if layer.has_column(&source) {
                layer.rename_column(&source, &l.name_column(slot))?;
            }
        }
        layer.fill_column(&lang_column(slot), Value::text(lang.as_str()));
    }
    if !languages.is_empty() {
        debug!("Assigned name slots to {:?}", languages);
    }
    Ok(())
}

pub fn unify(ctx: &PipelineContext, country: &Country) -> Result<usize> {
    let resolver = SourceResolver::new(vec![ctx.config.area_dir(StageArea::Normalized)]);
    let out = ctx.config.area_dir(StageArea::Unified);

    let mut written = 0;
    for level in ctx.max_level().descending() {
        let Some(mut layer) = resolver.read(&country.iso3, level)? else {
            continue;
        };
        refactor_columns(&mut layer, level)?;
        save(&out, &country.iso3, Some(level), &layer)?;
        written += 1;
    }
    Ok(written)
}
