//! Filter registry
//!
//! Filters are registered at startup and created by type name from the
//! settings file. [`build_chain`] turns a list of settings into a linear chain
//! hanging off the graph's source node.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::filters::{IdentityFilter, InvertFilter, PixellateFilter, DEFAULT_PIXEL_WIDTH};
use super::operators::{FrameConsumer, ImageOperator};
use super::{GraphError, NodeId, OperatorGraph};
use crate::error::PlayerError;
use crate::gpu_context::GpuContext;
use crate::render::{FramebufferCache, GpuTexture};

/// One entry of the configured filter chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(rename = "type")]
    pub filter_type: String,

    /// Strength or size, meaning depends on the filter; `None` uses its default
    #[serde(rename = "amount", default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f32>,

    /// Skipped when building the chain
    #[serde(rename = "bypassed", default)]
    pub bypassed: bool,
}

impl FilterSettings {
    pub fn new(filter_type: impl Into<String>) -> Self {
        Self {
            filter_type: filter_type.into(),
            amount: None,
            bypassed: false,
        }
    }

    pub fn with_amount(mut self, amount: f32) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// GPU resources handed to filters that can run on textures
#[derive(Clone)]
pub struct FilterGpu {
    pub gpu: Arc<GpuContext>,
    pub cache: FramebufferCache<GpuTexture>,
}

/// Factory for one filter type
pub trait FilterDefinition: Send + Sync {
    /// Unique type identifier used in settings (e.g. "invert")
    fn filter_type(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn default_amount(&self) -> Option<f32> {
        None
    }

    /// Create an operator; with `gpu` it must also accept texture framebuffers
    fn create(&self, settings: &FilterSettings, gpu: Option<&FilterGpu>) -> Box<dyn ImageOperator>;
}

struct IdentityDefinition;

impl FilterDefinition for IdentityDefinition {
    fn filter_type(&self) -> &'static str {
        "identity"
    }

    fn display_name(&self) -> &'static str {
        "Identity"
    }

    fn create(&self, _settings: &FilterSettings, _gpu: Option<&FilterGpu>) -> Box<dyn ImageOperator> {
        Box::new(IdentityFilter::new())
    }
}

struct InvertDefinition;

impl FilterDefinition for InvertDefinition {
    fn filter_type(&self) -> &'static str {
        "invert"
    }

    fn display_name(&self) -> &'static str {
        "Invert"
    }

    fn default_amount(&self) -> Option<f32> {
        Some(1.0)
    }

    fn create(&self, settings: &FilterSettings, gpu: Option<&FilterGpu>) -> Box<dyn ImageOperator> {
        let filter = InvertFilter::new(settings.amount.unwrap_or(1.0));
        match gpu {
            Some(g) => Box::new(filter.with_gpu(Arc::clone(&g.gpu), g.cache.clone())),
            None => Box::new(filter),
        }
    }
}

struct PixellateDefinition;

impl FilterDefinition for PixellateDefinition {
    fn filter_type(&self) -> &'static str {
        "pixellate"
    }

    fn display_name(&self) -> &'static str {
        "Pixellate"
    }

    fn default_amount(&self) -> Option<f32> {
        Some(DEFAULT_PIXEL_WIDTH)
    }

    fn create(&self, settings: &FilterSettings, gpu: Option<&FilterGpu>) -> Box<dyn ImageOperator> {
        let filter = PixellateFilter::new(settings.amount.unwrap_or(DEFAULT_PIXEL_WIDTH));
        match gpu {
            Some(g) => Box::new(filter.with_gpu(Arc::clone(&g.gpu), g.cache.clone())),
            None => Box::new(filter),
        }
    }
}

/// Registry of available filters
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn FilterDefinition>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FilterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Registry holding identity, invert and pixellate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(IdentityDefinition);
        registry.register(InvertDefinition);
        registry.register(PixellateDefinition);
        registry
    }

    pub fn register(&mut self, definition: impl FilterDefinition + 'static) {
        self.filters
            .insert(definition.filter_type().to_string(), Arc::new(definition));
    }

    pub fn get(&self, filter_type: &str) -> Option<Arc<dyn FilterDefinition>> {
        self.filters.get(filter_type).cloned()
    }

    pub fn contains(&self, filter_type: &str) -> bool {
        self.filters.contains_key(filter_type)
    }

    /// Registered type names, sorted
    pub fn filter_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.filters.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn create(&self, settings: &FilterSettings, gpu: Option<&FilterGpu>) -> Result<Box<dyn ImageOperator>, PlayerError> {
        let definition = self
            .get(&settings.filter_type)
            .ok_or_else(|| PlayerError::UnknownFilter(settings.filter_type.clone()))?;
        let resolved = FilterSettings {
            amount: settings.amount.or_else(|| definition.default_amount()),
            ..settings.clone()
        };
        tracing::debug!(
            "Filter registry: creating {} (amount {:?})",
            definition.display_name(),
            resolved.amount
        );
        Ok(definition.create(&resolved, gpu))
    }
}

/// Nodes created by [`build_chain`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChain {
    /// Filter nodes in chain order
    pub filters: Vec<NodeId>,
    pub sinks: Vec<NodeId>,
    /// Last node of the filter chain (the source when no filter is active)
    pub tail: NodeId,
}

impl FilterChain {
    /// Hang another sink off the end of the chain
    pub fn attach_sink(&mut self, graph: &mut OperatorGraph, sink: Box<dyn FrameConsumer>) -> Result<NodeId, GraphError> {
        let node = graph.add_boxed_sink(sink);
        graph.add_target(self.tail, node, 0)?;
        self.sinks.push(node);
        Ok(node)
    }
}

/// Wire `source -> filters... -> sinks`
///
/// Bypassed filters are skipped. Every sink receives the output of the last
/// active filter.
pub fn build_chain(
    graph: &mut OperatorGraph,
    source: NodeId,
    registry: &FilterRegistry,
    filters: &[FilterSettings],
    sinks: Vec<Box<dyn FrameConsumer>>,
    gpu: Option<&FilterGpu>,
) -> Result<FilterChain, PlayerError> {
    let mut chain = FilterChain {
        filters: Vec::new(),
        sinks: Vec::new(),
        tail: source,
    };

    for settings in filters.iter().filter(|f| !f.bypassed) {
        let operator = registry.create(settings, gpu)?;
        let node = graph.add_boxed_transform(operator);
        graph.add_target(chain.tail, node, 0)?;
        tracing::info!("Filter chain: added {} ({})", settings.filter_type, node);
        chain.filters.push(node);
        chain.tail = node;
    }

    for sink in sinks {
        chain.attach_sink(graph, sink)?;
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FrameRecorder;
    use crate::render::RenderFramebuffer;
    use crate::video::{FrameSize, MediaTime};

    #[test]
    fn test_builtins_registered() {
        let registry = FilterRegistry::with_builtins();
        assert_eq!(registry.filter_types(), vec!["identity", "invert", "pixellate"]);
        assert_eq!(
            registry.get("pixellate").unwrap().default_amount(),
            Some(DEFAULT_PIXEL_WIDTH)
        );
    }

    #[test]
    fn test_missing_amount_uses_definition_default() {
        let registry = FilterRegistry::with_builtins();
        assert_eq!(registry.get("invert").unwrap().display_name(), "Invert");

        let mut invert = registry.create(&FilterSettings::new("invert"), None).unwrap();
        let fb = RenderFramebuffer::from_pixels(FrameSize::new(1, 1), MediaTime::ZERO, vec![10, 20, 30, 255]);
        let output = invert.process(&fb, 0).unwrap().unwrap();
        assert_eq!(output.pixels().unwrap()[..4], [245, 235, 225, 255]);

        let mut untouched = registry
            .create(&FilterSettings::new("invert").with_amount(0.0), None)
            .unwrap();
        let output = untouched.process(&fb, 0).unwrap().unwrap();
        assert_eq!(output.pixels().unwrap()[..4], [10, 20, 30, 255]);
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let registry = FilterRegistry::with_builtins();
        let result = registry.create(&FilterSettings::new("sepia"), None);
        assert!(matches!(result, Err(PlayerError::UnknownFilter(name)) if name == "sepia"));
    }

    #[test]
    fn test_build_chain_feeds_every_sink() {
        let registry = FilterRegistry::with_builtins();
        let mut graph = OperatorGraph::new();
        let source = graph.add_source();
        let (first, first_log) = FrameRecorder::new("first");
        let (second, second_log) = FrameRecorder::new("second");

        let mut bypassed = FilterSettings::new("pixellate");
        bypassed.bypassed = true;
        let filters = vec![FilterSettings::new("invert").with_amount(1.0), bypassed];
        let sinks: Vec<Box<dyn FrameConsumer>> = vec![Box::new(first), Box::new(second)];
        let chain = build_chain(&mut graph, source, &registry, &filters, sinks, None).unwrap();
        assert_eq!(chain.filters.len(), 1);
        assert_eq!(graph.targets(chain.tail), chain.sinks);

        let fb = RenderFramebuffer::from_pixels(FrameSize::new(1, 1), MediaTime::from_millis(5), vec![10, 20, 30, 255]);
        graph.propagate(source, &fb).unwrap();

        for log in [first_log, second_log] {
            let frames = log.lock().unwrap();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].first_pixel, Some([245, 235, 225, 255]));
        }
    }

    #[test]
    fn test_empty_chain_links_sinks_to_source() {
        let registry = FilterRegistry::with_builtins();
        let mut graph = OperatorGraph::new();
        let source = graph.add_source();
        let (sink, _) = FrameRecorder::new("only");
        let sinks: Vec<Box<dyn FrameConsumer>> = vec![Box::new(sink)];
        let chain = build_chain(&mut graph, source, &registry, &[], sinks, None).unwrap();
        assert_eq!(chain.tail, source);
        assert_eq!(graph.targets(source), chain.sinks);
    }
}
