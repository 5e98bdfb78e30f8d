pub mod scoring_worker;
