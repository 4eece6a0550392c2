mod test_matrix;
mod test_ranked;
mod test_vector;
