//! Operator registry: plan node kind -> constructor.
//!
//! The registry is built explicitly and handed to the engine; there is no
//! global table. `Registry::with_builtins` covers the kinds this crate ships.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::source::{DatasetProvider, MemoryStore};
use crate::traits::{OpError, Source, Transformation};

/// One instantiated plan node.
pub enum Operator {
    Source(Box<dyn Source>),
    Transform(Box<dyn Transformation>),
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Source(s) => s.name(),
            Operator::Transform(t) => t.name(),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Operator::Source(_))
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Source(s) => write!(f, "Source({})", s.name()),
            Operator::Transform(t) => write!(f, "Transform({})", t.name()),
        }
    }
}

/// What a constructor may look at besides its own parameters.
#[derive(Clone)]
pub struct BuildContext {
    pub datasets: Arc<dyn DatasetProvider>,
    /// Default rows per table for sources.
    pub batch_rows: usize,
    /// Number of input edges wired into this node.
    pub inputs: usize,
}

impl BuildContext {
    pub fn new(datasets: Arc<dyn DatasetProvider>, batch_rows: usize) -> Self {
        Self {
            datasets,
            batch_rows,
            inputs: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: usize) -> Self {
        self.inputs = inputs;
        self
    }

    /// Reject anything but a single input edge.
    pub fn expect_unary(&self, kind: &str) -> Result<(), OpError> {
        if self.inputs != 1 {
            return Err(OpError::Plan(format!(
                "{kind} expects exactly one input, got {}",
                self.inputs
            )));
        }
        Ok(())
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::default()), 1024)
    }
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("batch_rows", &self.batch_rows)
            .field("inputs", &self.inputs)
            .finish()
    }
}

pub type Constructor =
    Arc<dyn Fn(&serde_json::Value, &BuildContext) -> Result<Operator, OpError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every builtin kind.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("from", |p, ctx| {
            crate::source::ReaderSource::from_params(p, ctx).map(|s| Operator::Source(Box::new(s)))
        });
        r.register("filter", |p, ctx| {
            ctx.expect_unary("filter")?;
            crate::filter::Filter::from_params(p).map(|t| Operator::Transform(Box::new(t)))
        });
        r.register("rename", |p, ctx| {
            ctx.expect_unary("rename")?;
            crate::rename::Rename::from_params(p).map(|t| Operator::Transform(Box::new(t)))
        });
        r.register("keep", |p, ctx| {
            ctx.expect_unary("keep")?;
            crate::project::Project::keep_from_params(p).map(|t| Operator::Transform(Box::new(t)))
        });
        r.register("drop", |p, ctx| {
            ctx.expect_unary("drop")?;
            crate::project::Project::drop_from_params(p).map(|t| Operator::Transform(Box::new(t)))
        });
        r.register("aggregate", |p, ctx| {
            ctx.expect_unary("aggregate")?;
            crate::aggregate::Aggregate::from_params(p).map(|t| Operator::Transform(Box::new(t)))
        });
        r.register("histogram_quantile", |p, ctx| {
            ctx.expect_unary("histogram_quantile")?;
            crate::quantile::HistogramQuantile::from_params(p)
                .map(|t| Operator::Transform(Box::new(t)))
        });
        r.register("union", |_, _| {
            Ok(Operator::Transform(Box::new(crate::union::Union::default())))
        });
        r
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&serde_json::Value, &BuildContext) -> Result<Operator, OpError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(ctor));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiate `kind`; `None` when the kind is not registered.
    pub fn create(
        &self,
        kind: &str,
        params: &serde_json::Value,
        ctx: &BuildContext,
    ) -> Option<Result<Operator, OpError>> {
        self.constructors.get(kind).map(|ctor| ctor(params, ctx))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

/// Decode operator parameters; a missing (`null`) params block reads as `{}`.
pub fn parse_params<T: DeserializeOwned>(
    kind: &str,
    params: &serde_json::Value,
) -> Result<T, OpError> {
    let res = if params.is_null() {
        serde_json::from_value(serde_json::Value::Object(Default::default()))
    } else {
        serde_json::from_value(params.clone())
    };
    res.map_err(|e| OpError::Plan(format!("{kind}: invalid params: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_cover_the_catalog() {
        let r = Registry::with_builtins();
        for kind in [
            "from",
            "filter",
            "rename",
            "keep",
            "drop",
            "aggregate",
            "histogram_quantile",
            "union",
        ] {
            assert!(r.contains(kind), "missing {kind}");
        }
        assert!(!r.contains("yield"));
    }

    #[test]
    fn unary_operators_reject_extra_inputs() {
        let r = Registry::with_builtins();
        let ctx = BuildContext::default().with_inputs(2);
        let res = r
            .create("filter", &json!({"expr": "v > 1"}), &ctx)
            .unwrap();
        assert!(matches!(res, Err(OpError::Plan(_))));
        assert!(r.create("nope", &json!({}), &ctx).is_none());
    }
}
