pub mod beam_search;
