use anyhow::{Context, Result};
use clap::Parser;
use docrag::{render_context, IndexArgs, Namespace, ProviderArgs, RetrievalEngine, RetrievalRequest};

#[derive(Parser, Debug)]
#[command(
    name = "docrag-query",
    about = "Run a two-stage retrieval query and print the context block"
)]
struct QueryCli {
    /// Question to retrieve context for.
    query: String,

    /// Parent classes fetched in stage 1.
    #[arg(long, env = "DOCRAG_TOP_K_PARENTS", default_value_t = 5)]
    top_k_parents: usize,

    /// Attributes returned after deduplication.
    #[arg(long, env = "DOCRAG_TOP_K_ATTRS", default_value_t = 8)]
    top_k_attrs: usize,

    /// Raw attribute matches requested in stage 2.
    #[arg(long, env = "DOCRAG_TOP_K_RAW_ATTRS", default_value_t = 50)]
    top_k_raw_attrs: usize,

    /// Drop attributes scoring below this value.
    #[arg(long, env = "DOCRAG_MIN_SCORE")]
    min_score: Option<f32>,

    /// Namespace holding class records.
    #[arg(long, env = "DOCRAG_PARENT_NAMESPACE", default_value = "objects")]
    parent_namespace: String,

    /// Namespace holding attribute records.
    #[arg(long, env = "DOCRAG_ATTR_NAMESPACE", default_value = "object_attrs")]
    attr_namespace: String,

    /// Print the raw result as JSON instead of the context block.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    provider: ProviderArgs,

    #[command(flatten)]
    index: IndexArgs,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    docrag::init_tracing();
    let cli = QueryCli::parse();

    let engine = RetrievalEngine::new(
        cli.provider.build_embedder()?,
        cli.index.build_index()?.index,
    );
    let request = RetrievalRequest {
        text: cli.query.clone(),
        top_k_parents: cli.top_k_parents.max(1),
        parent_namespace: Namespace::new(cli.parent_namespace.clone())?,
        attr_namespace: Namespace::new(cli.attr_namespace.clone())?,
        top_k_attrs: cli.top_k_attrs.max(1),
        top_k_raw_attrs: cli.top_k_raw_attrs.max(cli.top_k_attrs),
        min_score: cli.min_score,
    };
    let result = engine.query(&request).context("retrieval failed")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_context(&result));
    }
    Ok(())
}
