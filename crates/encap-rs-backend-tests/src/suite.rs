use std::sync::Arc;

use encap_rs::backend::Backend;
use encap_rs::graph::Graph;
use encap_rs::runtime::{ExecutionUnit, Executor, OutputBuffers};
use encap_rs::signature::Signature;
use encap_rs::tensor::HostTensor;
use encap_rs_backend_ref_cpu::RefTranslator;

use crate::fixtures::{
    add_graph, f32_tensor, neg_and_square_graph, random_f32, reshape_graph, seeded_rng,
    shape_tensor, test_config, unique_backend_name,
};

fn build<B: Backend>(
    register: &dyn Fn(&str) -> Arc<B>,
    graph: Graph,
    cache_depth: usize,
) -> anyhow::Result<Executor<B>> {
    let name = unique_backend_name("suite");
    register(&name);
    let executor = Executor::<B>::builder(ExecutionUnit::new(1, graph, name))
        .config(test_config(cache_depth))
        .translator(Arc::new(RefTranslator))
        .build()?;
    Ok(executor)
}

fn values(tensor: &HostTensor) -> Vec<f32> {
    tensor.to_f32_vec().expect("f32 output")
}

pub fn add_matches_expected<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, add_graph(), 4)?;
    let mut rng = seeded_rng(7);
    let a = random_f32(&mut rng, &[2, 3]);
    let b = random_f32(&mut rng, &[2, 3]);
    let mut outputs = OutputBuffers::new();

    executor.execute(&[a.clone(), b.clone()], &mut outputs)?;

    let expected: Vec<f32> = values(&a)
        .iter()
        .zip(values(&b).iter())
        .map(|(x, y)| x + y)
        .collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(values(&outputs.as_slice()[0]), expected);
    Ok(())
}

pub fn multiple_outputs_are_written<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, neg_and_square_graph(), 4)?;
    let x = f32_tensor(&[3], vec![1.0, -2.0, 3.0]);
    let mut outputs = OutputBuffers::new();

    executor.execute(&[x], &mut outputs)?;

    assert_eq!(values(&outputs.as_slice()[0]), vec![-1.0, 2.0, -3.0]);
    assert_eq!(values(&outputs.as_slice()[1]), vec![1.0, 4.0, 9.0]);
    Ok(())
}

pub fn repeat_signature_hits_cache<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, add_graph(), 4)?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![3.0, 4.0]);
    let mut outputs = OutputBuffers::new();

    let first = executor.execute(&[a.clone(), b.clone()], &mut outputs)?;
    let second = executor.execute(&[a, b], &mut outputs)?;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.artifact, second.artifact);
    assert_eq!(first.signature, Signature::from("2,;2,;/"));
    let stats = executor.stats();
    assert_eq!((stats.cache_misses, stats.cache_hits, stats.compiles), (1, 1, 1));
    Ok(())
}

pub fn new_shape_compiles_new_artifact<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, add_graph(), 4)?;
    let mut outputs = OutputBuffers::new();
    let small = f32_tensor(&[2], vec![1.0, 2.0]);
    let large = f32_tensor(&[3], vec![1.0, 2.0, 3.0]);

    let first = executor.execute(&[small.clone(), small], &mut outputs)?;
    let second = executor.execute(&[large.clone(), large], &mut outputs)?;

    assert_ne!(first.artifact, second.artifact);
    assert_eq!(executor.cache_len(), 2);
    assert_eq!(values(&outputs.as_slice()[0]), vec![2.0, 4.0, 6.0]);
    Ok(())
}

pub fn static_values_select_artifact<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, reshape_graph(), 4)?;
    assert_eq!(executor.static_inputs().static_positions().collect::<Vec<_>>(), vec![1]);
    let data = f32_tensor(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let mut outputs = OutputBuffers::new();

    let tall = executor.execute(&[data.clone(), shape_tensor(&[3, 2])], &mut outputs)?;
    assert_eq!(tall.signature, Signature::from("2,3,;2,;/3,2;"));
    assert_eq!(outputs.as_slice()[0].shape().dims(), &[3, 2]);

    let flat = executor.execute(&[data.clone(), shape_tensor(&[-1])], &mut outputs)?;
    assert_eq!(flat.signature, Signature::from("2,3,;1,;/-1;"));
    assert_eq!(outputs.as_slice()[0].shape().dims(), &[6]);
    assert_eq!(values(&outputs.as_slice()[0]), values(&data));

    assert_ne!(tall.artifact, flat.artifact);
    let again = executor.execute(&[data, shape_tensor(&[3, 2])], &mut outputs)?;
    assert!(again.cache_hit);
    assert_eq!(again.artifact, tall.artifact);
    Ok(())
}

pub fn least_recently_used_is_evicted<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, add_graph(), 2)?;
    let mut outputs = OutputBuffers::new();
    let inputs = |len: usize| {
        let tensor = f32_tensor(&[len], vec![1.0; len]);
        [tensor.clone(), tensor]
    };

    let s1 = executor.execute(&inputs(1), &mut outputs)?;
    let s2 = executor.execute(&inputs(2), &mut outputs)?;
    let s3 = executor.execute(&inputs(3), &mut outputs)?;

    assert_eq!(executor.cache_len(), 2);
    assert!(!executor.is_cached(s1.artifact));
    assert_eq!(executor.slot_count(s1.artifact), 0);
    assert_eq!(
        executor.cached_signatures(),
        vec![s3.signature.clone(), s2.signature.clone()]
    );
    assert_eq!(executor.stats().evictions, 1);

    // Touching S2 makes S3 the next victim.
    let hit = executor.execute(&inputs(2), &mut outputs)?;
    assert!(hit.cache_hit);
    let again = executor.execute(&inputs(1), &mut outputs)?;
    assert!(!again.cache_hit);
    assert_eq!(executor.cached_signatures(), vec![s1.signature, s2.signature]);
    assert_eq!(values(&outputs.as_slice()[0]), vec![2.0]);
    Ok(())
}

pub fn in_place_updates_are_observed<B, F>(register: &F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(&str) -> Arc<B>,
{
    let mut executor = build(register, add_graph(), 4)?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![10.0, 20.0]);
    let mut outputs = OutputBuffers::new();

    executor.execute(&[a.clone(), b.clone()], &mut outputs)?;
    assert_eq!(values(&outputs.as_slice()[0]), vec![11.0, 22.0]);

    a.bytes_mut()
        .copy_from_slice(&HostTensor::from_f32([2], vec![5.0, 6.0])?.bytes());
    executor.execute(&[a, b], &mut outputs)?;
    assert_eq!(values(&outputs.as_slice()[0]), vec![15.0, 26.0]);
    Ok(())
}
