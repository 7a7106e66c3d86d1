pub mod prelude;

pub mod ccd;
pub mod ccd_naive;
pub mod contract;
pub mod diis;
pub mod error;
pub mod pairing;
pub mod structs;
pub mod util;

#[test]
fn playground_pairing_ccd() {
    use crate::prelude::*;

    let mol_info = pairing::pairing_model(4, 2, 1.0, 0.5);
    let cc_config = CCDConfig { conv_tol_e: 1.0e-10, ..Default::default() };

    let (ccd_results, _) = ccd::ccd_iteration(&mol_info, &cc_config).unwrap();
    println!("CCD Total Energy: {}", ccd_results.e_tot);
    assert!((ccd_results.e_tot - 1.41663766472).abs() < 1e-9);
}

#[test]
fn playground_pairing_ccd_diis() {
    use crate::prelude::*;

    let mol_info = pairing::pairing_model(6, 3, 1.0, 0.4);
    let cc_config_plain = CCDConfig { conv_tol_e: 1.0e-9, ..Default::default() };
    let cc_config_diis = CCDConfig { diis: Some(DIISIncoreFlags::default()), ..cc_config_plain.clone() };

    let (ccd_plain, _) = ccd::ccd_iteration(&mol_info, &cc_config_plain).unwrap();
    let (ccd_diis, _) = ccd::ccd_iteration(&mol_info, &cc_config_diis).unwrap();
    println!("CCD Total Energy (plain / DIIS): {} / {}", ccd_plain.e_tot, ccd_diis.e_tot);
    println!("CCD Iterations (plain / DIIS): {} / {}", ccd_plain.niter, ccd_diis.niter);
    assert!((ccd_plain.e_tot - ccd_diis.e_tot).abs() < 1e-7);
}
