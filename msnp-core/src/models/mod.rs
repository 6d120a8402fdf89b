pub mod msn_object;
