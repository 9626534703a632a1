/// runnable preparation scenarios, chosen by task number from `main`
pub mod dst_examples;
