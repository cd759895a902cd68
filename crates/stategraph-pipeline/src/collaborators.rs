//! Hooks the pipeline consumes but does not implement itself.

use crate::types::{Model, RawData, Selection, Structure, Trajectory};
use stategraph_kernel::{CancellationToken, ProductionError};

/// Turns one raw item into a trajectory.
#[async_trait::async_trait]
pub trait TrajectoryProvider: Send + Sync {
    async fn parse(&self, data: &RawData, cancel: &CancellationToken) -> Result<Trajectory, ProductionError>;
}

/// Decides whether a model gets a unit-cell child.
pub trait SymmetryPredicate: Send + Sync {
    fn has_symmetry(&self, model: &Model) -> bool;
}

impl<F> SymmetryPredicate for F
where
    F: Fn(&Model) -> bool + Send + Sync,
{
    fn has_symmetry(&self, model: &Model) -> bool {
        self(model)
    }
}

/// A model has symmetry when it declares a spacegroup other than `P 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpacegroupSymmetry;

impl SymmetryPredicate for SpacegroupSymmetry {
    fn has_symmetry(&self, model: &Model) -> bool {
        model
            .frame
            .spacegroup
            .as_deref()
            .is_some_and(|sg| !sg.trim().is_empty() && sg.trim() != "P 1")
    }
}

/// Resolves a selection to atom indices of a structure.
#[async_trait::async_trait]
pub trait SelectionResolver: Send + Sync {
    async fn resolve(&self, structure: &Structure, selection: &Selection) -> Result<Vec<usize>, String>;
}

/// Resolver for index expressions: `all`, `none`, or a comma separated list
/// of indices and inclusive `a-b` ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSelectionResolver;

#[async_trait::async_trait]
impl SelectionResolver for IndexSelectionResolver {
    async fn resolve(&self, structure: &Structure, selection: &Selection) -> Result<Vec<usize>, String> {
        parse_index_expression(&selection.expression, structure.atom_count)
    }
}

fn parse_index_expression(expression: &str, atom_count: usize) -> Result<Vec<usize>, String> {
    match expression.trim() {
        "all" => return Ok((0..atom_count).collect()),
        "none" | "" => return Ok(Vec::new()),
        _ => {}
    }

    let mut atoms = Vec::new();
    for part in expression.split(',').map(str::trim) {
        let parse = |s: &str| {
            let index = s
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid atom index '{s}'"))?;
            if index >= atom_count {
                return Err(format!("atom index {index} out of range ({atom_count} atoms)"));
            }
            Ok(index)
        };
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(format!("empty range '{part}'"));
                }
                atoms.extend(start..=end);
            }
            None => atoms.push(parse(part)?),
        }
    }
    atoms.sort_unstable();
    atoms.dedup();
    Ok(atoms)
}
