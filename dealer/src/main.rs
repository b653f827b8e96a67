use std::str::FromStr;

use argh::FromArgs;
use mpc::{
    fields::{Mersenne127, Mersenne61},
    spdz::{generate_precomputed_data, PreprocessingCounts},
    MpcField,
};
use rand::{prelude::StdRng, SeedableRng};

/// Field type for preprocessing.
enum FieldType {
    Mersenne61,
    Mersenne127,
}

impl FromStr for FieldType {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "61" => Ok(FieldType::Mersenne61),
            "127" => Ok(FieldType::Mersenne127),
            _ => Err("Unsupported field type. Available options: 61, 127"),
        }
    }
}

#[derive(FromArgs)]
/// SPDZ offline preprocessing tool.
struct Options {
    /// number of parties participating in protocol
    #[argh(option)]
    parties: usize,

    /// output path pattern ('#' is replaced with party ID)
    #[argh(option)]
    output: String,

    /// target field
    #[argh(option, default = "FieldType::Mersenne127")]
    field: FieldType,

    /// number of beaver triples to be generated
    #[argh(option)]
    beaver_triples: usize,

    /// number of random elements to be generated
    #[argh(option, default = "0")]
    random_elements: usize,

    /// number of random bits to be generated
    #[argh(option, default = "0")]
    random_bits: usize,

    /// number of input masks to be generated for each party
    #[argh(option)]
    input_masks: usize,

    /// number of truncation pairs to be generated
    #[argh(option, default = "0")]
    truncation_pairs: usize,

    /// shift amount for truncation pairs
    #[argh(option, default = "0")]
    truncation_shift: usize,
}

fn run<T: MpcField>(options: Options) {
    let counts = PreprocessingCounts {
        beaver_triples: options.beaver_triples,
        random_elements: options.random_elements,
        random_bits: options.random_bits,
        input_masks: options.input_masks,
        truncation_pairs: if options.truncation_pairs > 0 {
            vec![(options.truncation_shift, options.truncation_pairs)]
        } else {
            Vec::new()
        },
    };

    println!("Generating data for {} parties...", options.parties);
    let mut rng = StdRng::from_entropy();
    let data = generate_precomputed_data::<T, _>(options.parties, &counts, &mut rng);

    println!("Saving...");
    for (id, party_data) in data.into_iter().enumerate() {
        let output_path = options.output.replace('#', &format!("{id}"));
        party_data.save_file(output_path).unwrap();
    }
}

fn main() {
    let options: Options = argh::from_env();
    match options.field {
        FieldType::Mersenne61 => run::<Mersenne61>(options),
        FieldType::Mersenne127 => run::<Mersenne127>(options),
    }
}
