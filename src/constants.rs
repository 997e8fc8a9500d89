pub const TS_DASHES_BLANK_COLONS_DOT_BLANK: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Separator between the two reads of a paired consensus sequence.
pub const PAIR_SEPARATOR: &[u8] = b"nnnn";
pub const PAIR_SEPARATOR_BASE: u8 = b'n';
pub const GAP_CHAR: u8 = b'-';
/// Fill value for sequence array cells with no data.
pub const MISSING_BASE: u8 = b'N';
/// Terminates every locus block in batch files and the aligned cluster file.
pub const LOCUS_TERMINATOR: &str = "//\n//\n";
/// Appended to record names before alignment, since the engine reorders records.
pub const ALIGN_TAG: &str = ";*";

pub const BATCH_SIZE_DEFAULT: usize = 100;
pub const BATCH_ADAPTIVE_THRESHOLD: usize = 2000;
pub const BATCH_ADAPTIVE_DIVISOR: usize = 10;

pub const DB_CHUNK_SMALL: usize = 100;
pub const DB_CHUNK_LARGE: usize = 1000;
pub const DB_CHUNK_THRESHOLD: usize = 5000;
pub const DB_FORMAT_VERSION: u32 = 2;

pub const NUM_CHANNELS: usize = 4;

pub const CATCONS_SUFFIX: &str = "_catcons.tmp";
pub const CATHAPS_SUFFIX: &str = "_cathaps.tmp";
pub const HITS_SUFFIX: &str = ".utemp";
pub const UNMATCHED_SUFFIX: &str = ".htemp";
pub const CATCLUST_SUFFIX: &str = "_catclust.gz";
pub const TMPALIGN_SUFFIX: &str = "-tmpaligns";
pub const DATABASE_SUFFIX: &str = ".clust.bin";
pub const STORE_COUNTS_SUFFIX: &str = ".clust.catg";
pub const STORE_SEQS_SUFFIX: &str = ".clust.seqs";
pub const SAMPLE_TMP_SUFFIX: &str = ".tmp.bin";
pub const CLUSTER_LOG_NAME: &str = "s6_cluster_stats.txt";

pub const CLI_HEADINGS: [&str; 3] = [
    "Clustering Parameters",
    "Alignment Parameters",
    "Miscellaneous Options",
];
