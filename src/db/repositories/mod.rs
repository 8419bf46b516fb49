mod passes;
