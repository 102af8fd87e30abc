//! Compilation context and main entry point.
//!
//! The context owns the pipeline settings and drives every stage in order:
//! type checking, three-address-code generation, preprocessing, block
//! formation, the per-graph analyses, optional loop vectorization, and
//! x86-64 emission. Data flows strictly forward; every stage either
//! completes or the compilation stops with an error.

use crate::ast::Program;
use crate::blocks::Blocks;
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::build_cfgs;
use crate::fx::FxHashSet;
use crate::ir::TacBuilder;
use crate::isa::x64::CodeGenerator;
use crate::loop_analysis::LoopAnalysis;
use crate::preopt;
use crate::reach::ReachingDefs;
use crate::result::CodegenResult;
use crate::settings::Flags;
use crate::vectorizer;
use log::debug;

/// Pipeline state and entry point.
///
/// Each compilation builds its counters and arenas afresh, so independent
/// compilations through separate contexts never share state.
pub struct Context {
    /// The settings this context compiles under.
    pub flags: Flags,
}

impl Context {
    /// A context with default settings.
    pub fn new() -> Self {
        Self {
            flags: Flags::default(),
        }
    }

    /// A context with the given settings.
    pub fn with_flags(flags: Flags) -> Self {
        Self { flags }
    }

    /// Compile `program` to x86-64 assembly text (`.data` then `.text`).
    pub fn compile(&mut self, program: &mut Program) -> CodegenResult<String> {
        program.type_check()?;

        let mut builder = TacBuilder::new();
        let mut tac = program.generate(&mut builder)?;
        if log::log_enabled!(log::Level::Debug) {
            for inst in &tac {
                debug!("tac: {inst}");
            }
        }

        preopt::preprocess(&mut tac);

        let mut blocks = Blocks::from_tac(tac);

        if self.flags.enable_vectorizer() && !blocks.is_empty() {
            self.run_vectorizer(&mut blocks, &mut builder, program);
        }

        CodeGenerator::generate(&blocks, &program.tables)
    }

    /// Find and transform vectorizable loops.
    ///
    /// The control-flow graphs, dominator trees, and reach results are
    /// rebuilt from scratch after every mutation of the block set; the
    /// scalar tail loops created by a transformation are excluded from
    /// further attempts.
    fn run_vectorizer(
        &self,
        blocks: &mut Blocks,
        builder: &mut TacBuilder,
        program: &mut Program,
    ) {
        let mut attempted: FxHashSet<String> = FxHashSet::default();
        loop {
            let cfgs = build_cfgs(blocks);
            let mut transformed = false;

            'graphs: for cfg in &cfgs {
                let domtree = DominatorTree::with_cfg(cfg, blocks);
                let reach = ReachingDefs::with_cfg(cfg, blocks);
                let mut analysis = LoopAnalysis::new();
                analysis.compute(cfg, blocks, &domtree, &reach, &program.tables);

                for nest in analysis.nests() {
                    if !analysis.can_vectorize(&nest, blocks) {
                        continue;
                    }
                    for &li in &nest.loops {
                        let lp = &analysis.loops[li];
                        let Some(header_label) =
                            blocks[lp.header].first_label().map(str::to_string)
                        else {
                            continue;
                        };
                        if !attempted.insert(header_label) {
                            continue;
                        }
                        let inner = analysis.inner_headers(li);
                        if let Some(tail_label) = vectorizer::vectorize_loop(
                            lp,
                            &inner,
                            blocks,
                            builder,
                            &mut program.tables,
                            self.flags.unroll_factor(),
                        ) {
                            attempted.insert(tail_label);
                            transformed = true;
                            break 'graphs;
                        }
                    }
                }
            }

            if !transformed {
                break;
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
