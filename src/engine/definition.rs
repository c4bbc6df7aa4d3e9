use super::context::StageState;
use super::stage::Stage;

/// An immutable, ordered list of named stages. Built once at process start;
/// every observed workflow is a linear chain, so there is no graph here.
pub struct PipelineDefinition<C: StageState> {
    name: &'static str,
    stages: Vec<Box<dyn Stage<C>>>,
}

impl<C: StageState> PipelineDefinition<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: impl Stage<C> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stages(&self) -> &[Box<dyn Stage<C>>] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}
