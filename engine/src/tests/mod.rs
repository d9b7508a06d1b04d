mod runner_test;
mod swap_chain_test;
